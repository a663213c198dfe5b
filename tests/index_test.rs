use sdkeeper::config::{DeviceConfig, FolderConfig};
use sdkeeper::index::{FileIndex, FileStat, Folder, ListOrder, SortKey};
use sdkeeper::msg::DevMessage;
use sdkeeper::uevent::parse_uevent;
use std::path::Path;

fn stat(size: u64, mtime: i64) -> FileStat {
    FileStat {
        size,
        space: size,
        mtime,
    }
}

#[test]
fn test_filename_sort_scenario() {
    // files arrive out of order, the listing does not
    let mut index = FileIndex::new(SortKey::FileName);
    for name in ["c.mp4", "a.mp4", "b.mp4"] {
        index.add(name, stat(1024, 100));
    }

    let ascending: Vec<_> = index
        .snapshot(ListOrder::Ascending)
        .into_iter()
        .map(|row| row.name)
        .collect();
    assert_eq!(ascending, ["a.mp4", "b.mp4", "c.mp4"]);

    let descending: Vec<_> = index
        .snapshot(ListOrder::Descending)
        .into_iter()
        .map(|row| row.name)
        .collect();
    assert_eq!(descending, ["c.mp4", "b.mp4", "a.mp4"]);
}

#[test]
fn test_mtime_sort_rewrite_scenario() {
    // a rewritten file moves to its new position, count stays at two
    let mut index = FileIndex::new(SortKey::ModifyTime);
    index.add("old.mp4", stat(1024, 100));
    index.add("new.mp4", stat(1024, 200));
    index.add("old.mp4", stat(2048, 300));

    assert_eq!(index.file_count(), 2);
    let rows = index.snapshot(ListOrder::Ascending);
    assert_eq!(rows[0].name, "new.mp4");
    assert_eq!(rows[1].name, "old.mp4");
    assert_eq!(rows[1].size, 2048);
    assert_eq!(index.total_size(), 1024 + 2048);
}

#[test]
fn test_aggregates_follow_every_mutation() {
    let mut index = FileIndex::new(SortKey::FileName);
    index.add("a.mp4", stat(10, 1));
    index.add("b.mp4", stat(20, 2));
    index.add("c.mp4", stat(30, 3));
    index.remove("b.mp4");
    index.add("a.mp4", stat(15, 4));

    let rows = index.snapshot(ListOrder::Ascending);
    assert_eq!(rows.len(), index.file_count());
    let total: u64 = rows.iter().map(|row| row.size).sum();
    assert_eq!(total, index.total_size());
    assert_eq!(index.file_count(), 2);
    assert_eq!(index.total_size(), 45);
}

#[test]
fn test_folder_lookup_with_and_without_separator() {
    let config = DeviceConfig::default();
    let folder_cfg = &config.folders[0];
    let folder = Folder::from_config(
        folder_cfg.absolute_path(&config.mount_path),
        folder_cfg,
    );

    assert!(folder.matches(Path::new("/mnt/sdcard/video_front/")));
    assert!(folder.matches(Path::new("/mnt/sdcard/video_front")));
    assert!(!folder.matches(Path::new("/mnt/sdcard/photos")));
}

#[test]
fn test_default_config_matches_documented_layout() {
    let config = DeviceConfig::default();
    let paths: Vec<_> = config
        .folders
        .iter()
        .map(|folder| folder.absolute_path(&config.mount_path))
        .collect();
    assert_eq!(paths[0], Path::new("/mnt/sdcard/video_front"));
    assert_eq!(paths[1], Path::new("/mnt/sdcard/video_back"));
}

#[test]
fn test_uevent_to_message_flow() {
    // the exact shape the listener hands to the controller
    let mut buf = Vec::new();
    for field in [
        "libudev",
        "ACTION=add",
        "SUBSYSTEM=block",
        "DEVTYPE=partition",
        "DEVNAME=mmcblk1p1",
    ] {
        buf.extend_from_slice(field.as_bytes());
        buf.push(0);
    }
    assert_eq!(
        parse_uevent(&buf),
        Some(DevMessage::Add("mmcblk1p1".into()))
    );
}

#[test]
fn test_custom_folder_config() {
    let folder = FolderConfig {
        path: "recordings/events/".into(),
        sort: SortKey::ModifyTime,
        limit_by_count: true,
        limit: 100,
    };
    assert_eq!(
        folder.absolute_path(Path::new("/media/card")),
        Path::new("/media/card/recordings/events")
    );
}
