use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::SortKey;
use crate::{Result, SdKeeperError};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Mount point to manage (overrides the configured one)
    #[arg(short, long)]
    pub mount_path: Option<PathBuf>,

    /// JSON device configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds between status reports
    #[arg(long, default_value_t = 10)]
    pub status_interval: u64,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Device attributes. Immutable once the manager is initialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub mount_path: PathBuf,
    /// Retention state before the first hysteresis decision
    pub auto_delete: bool,
    /// Arm auto-delete when free space falls to this many MiB
    pub free_low_mib: u64,
    /// Disarm auto-delete when free space recovers to this many MiB
    pub free_high_mib: u64,
    pub folders: Vec<FolderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Path relative to the mount point, e.g. "video_front/"
    pub path: String,
    pub sort: SortKey,
    /// Interpret `limit` as a file count instead of a percent share
    #[serde(default)]
    pub limit_by_count: bool,
    /// Whole-percent share of used space, or file count
    pub limit: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/mnt/sdcard"),
            auto_delete: true,
            free_low_mib: 500,
            free_high_mib: 1000,
            folders: vec![
                FolderConfig {
                    path: "video_front/".into(),
                    sort: SortKey::FileName,
                    limit_by_count: false,
                    limit: 50,
                },
                FolderConfig {
                    path: "video_back/".into(),
                    sort: SortKey::FileName,
                    limit_by_count: false,
                    limit: 50,
                },
            ],
        }
    }
}

impl DeviceConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| SdKeeperError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.mount_path.as_os_str().is_empty() {
            return Err(SdKeeperError::Config("mount path is empty".into()));
        }
        if self.free_low_mib >= self.free_high_mib {
            return Err(SdKeeperError::Config(format!(
                "hysteresis band must satisfy low < high ({} >= {})",
                self.free_low_mib, self.free_high_mib
            )));
        }
        for folder in &self.folders {
            if folder.path.trim_matches('/').is_empty() {
                return Err(SdKeeperError::Config("folder path is empty".into()));
            }
            if !folder.limit_by_count && folder.limit > 100 {
                return Err(SdKeeperError::Config(format!(
                    "share limit for {} exceeds 100 percent",
                    folder.path
                )));
            }
        }
        Ok(())
    }
}

impl FolderConfig {
    /// Resolves the folder under its mount point.
    pub fn absolute_path(&self, mount_path: &Path) -> PathBuf {
        mount_path.join(self.path.trim_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.mount_path, PathBuf::from("/mnt/sdcard"));
        assert!(cfg.auto_delete);
        assert_eq!(cfg.free_low_mib, 500);
        assert_eq!(cfg.free_high_mib, 1000);
        assert_eq!(cfg.folders.len(), 2);
        assert_eq!(cfg.folders[0].path, "video_front/");
        assert_eq!(cfg.folders[1].path, "video_back/");
        for folder in &cfg.folders {
            assert_eq!(folder.sort, SortKey::FileName);
            assert!(!folder.limit_by_count);
            assert_eq!(folder.limit, 50);
        }
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let cfg = DeviceConfig {
            free_low_mib: 1000,
            free_high_mib: 500,
            ..DeviceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_folder_path() {
        let mut cfg = DeviceConfig::default();
        cfg.folders[0].path = "//".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_folders_is_valid() {
        let cfg = DeviceConfig {
            folders: vec![],
            ..DeviceConfig::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_absolute_path_normalises_slashes() {
        let folder = FolderConfig {
            path: "/video_front/".into(),
            sort: SortKey::FileName,
            limit_by_count: false,
            limit: 50,
        };
        assert_eq!(
            folder.absolute_path(Path::new("/mnt/sdcard")),
            PathBuf::from("/mnt/sdcard/video_front")
        );
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = DeviceConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: DeviceConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.mount_path, cfg.mount_path);
        assert_eq!(back.folders.len(), cfg.folders.len());
    }
}
