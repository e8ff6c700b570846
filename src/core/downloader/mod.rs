pub mod client;
pub mod release;
pub mod source;

pub use client::Downloader;
pub use release::{GitHubRelease, ReleaseAsset, ReleaseClient, ReleaseSpec};
pub use source::{AssetSource, GitHubAssetSource};
