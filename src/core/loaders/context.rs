use std::path::Path;

use crate::core::cancel::CancelSignal;
use crate::core::downloader::AssetSource;
use crate::core::state::ProvisionerSettings;

/// Everything an installer needs for one run.
pub struct InstallContext<'a> {
    pub server_dir: &'a Path,
    pub download_dir: &'a Path,
    pub source: &'a dyn AssetSource,
    pub settings: &'a ProvisionerSettings,
    pub cancel: &'a CancelSignal,
}
