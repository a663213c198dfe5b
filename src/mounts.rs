use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, SdKeeperError};

const MOUNT_TABLE: &str = "/proc/mounts";

/// One line of the kernel mount table.
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: String,
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let mut cols = line.split_whitespace();
    let device = cols.next()?;
    let mount_point = cols.next()?;
    let fs_type = cols.next()?;
    let options = cols.next().unwrap_or("");
    Some(MountEntry {
        device: device.to_string(),
        mount_point: PathBuf::from(mount_point),
        fs_type: fs_type.to_string(),
        options: options.to_string(),
    })
}

pub fn find_by_mount_point(table: &str, path: &Path) -> Option<MountEntry> {
    table
        .lines()
        .filter_map(parse_line)
        .find(|entry| entry.mount_point == path)
}

/// Accepts either a bare device name (uevent `DEVNAME=sdb1`) or a full
/// node path (`/dev/sdb1`).
pub fn find_by_device(table: &str, dev: &str) -> Option<MountEntry> {
    table.lines().filter_map(parse_line).find(|entry| {
        entry.device == dev || entry.device.ends_with(&format!("/{dev}"))
    })
}

pub fn entry_for_mount_point(path: &Path) -> Result<MountEntry> {
    let table = fs::read_to_string(MOUNT_TABLE)?;
    find_by_mount_point(&table, path)
        .ok_or_else(|| SdKeeperError::MountEntryNotFound(path.display().to_string()))
}

pub fn mount_point_for_device(dev: &str) -> Result<PathBuf> {
    let table = fs::read_to_string(MOUNT_TABLE)?;
    find_by_device(&table, dev)
        .map(|entry| entry.mount_point)
        .ok_or_else(|| SdKeeperError::MountEntryNotFound(dev.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/root / ext4 rw,relatime 0 0
tmpfs /tmp tmpfs rw,nosuid,nodev 0 0
/dev/mmcblk1p1 /mnt/sdcard vfat rw,relatime,fmask=0022,dmask=0022 0 0
";

    #[test]
    fn test_find_by_mount_point() {
        let entry = find_by_mount_point(TABLE, Path::new("/mnt/sdcard")).unwrap();
        assert_eq!(entry.device, "/dev/mmcblk1p1");
        assert_eq!(entry.fs_type, "vfat");
        assert!(entry.options.starts_with("rw,relatime"));
    }

    #[test]
    fn test_find_by_mount_point_misses_prefix() {
        assert!(find_by_mount_point(TABLE, Path::new("/mnt")).is_none());
    }

    #[test]
    fn test_find_by_device_bare_name() {
        let entry = find_by_device(TABLE, "mmcblk1p1").unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/mnt/sdcard"));
    }

    #[test]
    fn test_find_by_device_full_path() {
        let entry = find_by_device(TABLE, "/dev/mmcblk1p1").unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/mnt/sdcard"));
    }

    #[test]
    fn test_find_by_device_rejects_suffix_overlap() {
        // "blk1p1" is a suffix of the node name but not a device
        assert!(find_by_device(TABLE, "blk1p1").is_none());
    }
}
