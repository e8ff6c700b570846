pub mod editor;
pub mod processes;
pub mod supervisor;

pub use editor::{await_external_edit, EditorOutcome};
pub use processes::{kill_stale_processes, requires_elevation};
pub use supervisor::{ProcessRunOutcome, ProcessSupervisor, RunSpec, SupervisedRun};
