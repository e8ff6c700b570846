pub mod archive;
pub mod context;
pub mod doorstop;
pub mod installer;
pub mod plugin;

pub use context::InstallContext;
pub use doorstop::{DoorstopBootstrapper, DoorstopDescriptor};
pub use installer::{ArchiveSource, ComponentInstaller, InstallReceipt};
pub use plugin::PluginInstaller;
