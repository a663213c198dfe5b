use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::FolderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    FileName,
    ModifyTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Ascending,
    Descending,
}

/// Position of a record in the sorted sequence. Within one index all keys
/// use the same variant. Equal modification stamps keep arrival order via
/// the insertion sequence number; filenames are unique so they need none.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RecordKey {
    Name(String),
    Mtime(i64, u64),
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    /// Logical byte count
    pub size: u64,
    /// On-disk allocation; may exceed `size`
    pub space: u64,
    pub mtime: i64,
}

/// Row returned by listing snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
}

/// File metadata as the index consumes it.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub space: u64,
    pub mtime: i64,
}

impl From<&std::fs::Metadata> for FileStat {
    fn from(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            size: meta.len(),
            space: meta.blocks() * 512,
            mtime: meta.mtime(),
        }
    }
}

/// Sorted file index for one managed folder. At most one record per
/// filename; aggregates are maintained on every mutation.
pub struct FileIndex {
    sort: SortKey,
    records: BTreeMap<RecordKey, FileRecord>,
    by_name: HashMap<String, RecordKey>,
    next_seq: u64,
    total_size: u64,
    total_space: u64,
}

impl FileIndex {
    pub fn new(sort: SortKey) -> Self {
        Self {
            sort,
            records: BTreeMap::new(),
            by_name: HashMap::new(),
            next_seq: 0,
            total_size: 0,
            total_space: 0,
        }
    }

    /// Inserts `name` at its sorted position, replacing any existing record
    /// with the same name.
    pub fn add(&mut self, name: &str, stat: FileStat) {
        if let Some(key) = self.by_name.remove(name) {
            if let Some(old) = self.records.remove(&key) {
                self.total_size -= old.size;
                self.total_space -= old.space;
            }
        }

        let key = match self.sort {
            SortKey::FileName => RecordKey::Name(name.to_string()),
            SortKey::ModifyTime => {
                let key = RecordKey::Mtime(stat.mtime, self.next_seq);
                self.next_seq += 1;
                key
            }
        };

        self.total_size += stat.size;
        self.total_space += stat.space;
        self.by_name.insert(name.to_string(), key.clone());
        self.records.insert(
            key,
            FileRecord {
                name: name.to_string(),
                size: stat.size,
                space: stat.space,
                mtime: stat.mtime,
            },
        );
    }

    /// Removes `name` if present. A second call is a no-op.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(key) = self.by_name.remove(name) else {
            return false;
        };
        if let Some(old) = self.records.remove(&key) {
            self.total_size -= old.size;
            self.total_space -= old.space;
        }
        true
    }

    /// Head of the sorted sequence: the oldest record or the
    /// lexicographically smallest name, depending on the sort key.
    pub fn first(&self) -> Option<&FileRecord> {
        self.records.values().next()
    }

    pub fn file_count(&self) -> usize {
        self.records.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn total_space(&self) -> u64 {
        self.total_space
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dense copy of the index in the requested order. The backing
    /// structure is never exposed.
    pub fn snapshot(&self, order: ListOrder) -> Vec<FileInfo> {
        let row = |r: &FileRecord| FileInfo {
            name: r.name.clone(),
            size: r.size,
            mtime: r.mtime,
        };
        match order {
            ListOrder::Ascending => self.records.values().map(row).collect(),
            ListOrder::Descending => self.records.values().rev().map(row).collect(),
        }
    }
}

/// One managed folder: its absolute path, retention limits, and the index
/// of its immediate files behind the folder lock.
pub struct Folder {
    path: PathBuf,
    limit_by_count: bool,
    limit: u64,
    index: Mutex<FileIndex>,
}

impl Folder {
    pub fn from_config(path: PathBuf, cfg: &FolderConfig) -> Self {
        Self {
            path,
            limit_by_count: cfg.limit_by_count,
            limit: cfg.limit,
            index: Mutex::new(FileIndex::new(cfg.sort)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn limit_by_count(&self) -> bool {
        self.limit_by_count
    }

    pub fn index(&self) -> MutexGuard<'_, FileIndex> {
        self.index.lock().unwrap()
    }

    pub fn matches(&self, candidate: &Path) -> bool {
        self.path == candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(size: u64, mtime: i64) -> FileStat {
        FileStat {
            size,
            space: size.next_multiple_of(4096),
            mtime,
        }
    }

    fn check_invariants(index: &FileIndex) {
        let rows = index.snapshot(ListOrder::Ascending);
        assert_eq!(rows.len(), index.file_count());
        let size: u64 = rows.iter().map(|r| r.size).sum();
        assert_eq!(size, index.total_size());
        let mut names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), rows.len());
    }

    #[test]
    fn test_filename_sort() {
        let mut index = FileIndex::new(SortKey::FileName);
        index.add("c.mp4", stat(10, 100));
        index.add("a.mp4", stat(20, 200));
        index.add("b.mp4", stat(30, 300));

        let asc: Vec<_> = index
            .snapshot(ListOrder::Ascending)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(asc, ["a.mp4", "b.mp4", "c.mp4"]);

        let desc: Vec<_> = index
            .snapshot(ListOrder::Descending)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(desc, ["c.mp4", "b.mp4", "a.mp4"]);
        check_invariants(&index);
    }

    #[test]
    fn test_mtime_sort_reinsertion() {
        let mut index = FileIndex::new(SortKey::ModifyTime);
        index.add("old.mp4", stat(10, 100));
        index.add("new.mp4", stat(10, 200));
        index.add("old.mp4", stat(10, 300));

        assert_eq!(index.file_count(), 2);
        let asc: Vec<_> = index
            .snapshot(ListOrder::Ascending)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(asc, ["new.mp4", "old.mp4"]);
        check_invariants(&index);
    }

    #[test]
    fn test_equal_mtimes_keep_arrival_order() {
        let mut index = FileIndex::new(SortKey::ModifyTime);
        index.add("first.mp4", stat(1, 100));
        index.add("second.mp4", stat(2, 100));
        index.add("third.mp4", stat(3, 100));

        let asc: Vec<_> = index
            .snapshot(ListOrder::Ascending)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(asc, ["first.mp4", "second.mp4", "third.mp4"]);
    }

    #[test]
    fn test_add_updates_in_place() {
        let mut index = FileIndex::new(SortKey::FileName);
        index.add("a.mp4", stat(10, 100));
        index.add("a.mp4", stat(50, 400));

        assert_eq!(index.file_count(), 1);
        let row = &index.snapshot(ListOrder::Ascending)[0];
        assert_eq!(row.size, 50);
        assert_eq!(row.mtime, 400);
        assert_eq!(index.total_size(), 50);
        check_invariants(&index);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut index = FileIndex::new(SortKey::FileName);
        index.add("a.mp4", stat(10, 100));
        assert!(index.remove("a.mp4"));
        assert!(!index.remove("a.mp4"));
        assert!(index.is_empty());
        assert_eq!(index.total_size(), 0);
        assert_eq!(index.total_space(), 0);
    }

    #[test]
    fn test_add_then_remove_restores_state() {
        let mut index = FileIndex::new(SortKey::ModifyTime);
        index.add("keep.mp4", stat(10, 100));
        let before = index.snapshot(ListOrder::Ascending);

        index.add("drop.mp4", stat(99, 50));
        index.remove("drop.mp4");

        let after = index.snapshot(ListOrder::Ascending);
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0].name, before[0].name);
        assert_eq!(index.total_size(), 10);
        check_invariants(&index);
    }

    #[test]
    fn test_first_is_eviction_head() {
        let mut index = FileIndex::new(SortKey::ModifyTime);
        index.add("newer.mp4", stat(1, 500));
        index.add("oldest.mp4", stat(1, 100));
        index.add("middle.mp4", stat(1, 300));
        assert_eq!(index.first().unwrap().name, "oldest.mp4");
    }

    #[test]
    fn test_folder_matches_ignores_trailing_separator() {
        let folder = Folder::from_config(
            PathBuf::from("/mnt/sdcard/video_front"),
            &FolderConfig {
                path: "video_front/".into(),
                sort: SortKey::FileName,
                limit_by_count: false,
                limit: 50,
            },
        );
        assert!(folder.matches(Path::new("/mnt/sdcard/video_front/")));
        assert!(folder.matches(Path::new("/mnt/sdcard/video_front")));
        assert!(!folder.matches(Path::new("/mnt/sdcard/video_back")));
    }
}
