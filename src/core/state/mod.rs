pub mod settings;

pub use settings::{default_settings_path, ProvisionerSettings};
