use thiserror::Error;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum SdKeeperError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No mount table entry for {0}")]
    MountEntryNotFound(String),

    #[error("Device {device} is mounted at {mount_point}, not at the managed path")]
    MountMismatch { device: String, mount_point: PathBuf },

    #[error("Not a managed folder: {0}")]
    FolderNotFound(PathBuf),

    #[error("Netlink socket error: {0}")]
    Netlink(String),
}
