use std::process::ExitCode;

use clap::Parser;
use tabg_provisioner_lib::commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    tabg_provisioner_lib::init_tracing();
    let cli = Cli::parse();
    let outcome = tabg_provisioner_lib::run(cli).await;
    ExitCode::from(outcome.exit_code())
}
