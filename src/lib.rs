pub mod config;
pub mod error;
pub mod index;
pub mod mounts;
pub mod msg;
pub mod scanner;
pub mod storage;
pub mod uevent;
pub mod watcher;

pub use config::{DeviceConfig, FolderConfig};
pub use error::SdKeeperError;
pub use index::{FileInfo, ListOrder, SortKey};
pub use storage::{MountStatus, Storage};

pub type Result<T> = std::result::Result<T, SdKeeperError>;
