use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::index::{FileStat, Folder};
use crate::storage::{DeviceShared, MountStatus};
use crate::watcher::FsWatcher;
use crate::Result;

const TICK: Duration = Duration::from_millis(10);
/// Free space is re-checked roughly every half second of ticks.
const ACTION_TICKS: u32 = 50;
/// Enumeration yields briefly every this many insertions.
const SCAN_YIELD_EVERY: usize = 100;
const SCAN_PAUSE: Duration = Duration::from_micros(100);
const DELETE_PAUSE: Duration = Duration::from_micros(100);

/// Samples the filesystem totals for `path` in KiB.
pub fn disk_size(path: &Path) -> Result<(u64, u64)> {
    let stat = rustix::fs::statfs(path).map_err(std::io::Error::from)?;
    let total = (stat.f_blocks as u64).saturating_mul(stat.f_bsize as u64) >> 10;
    let free = (stat.f_bfree as u64).saturating_mul(stat.f_bsize as u64) >> 10;
    Ok((total, free))
}

/// Worker thread for one mounted episode: builds the folder indexes,
/// hosts the filesystem watcher, and runs the free-space retention loop.
pub(crate) struct ScanWorker {
    handle: JoinHandle<()>,
}

impl ScanWorker {
    pub fn spawn(shared: Arc<DeviceShared>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("file-scan".into())
            .spawn(move || run(shared))?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("scan worker panicked");
        }
    }
}

fn run(shared: Arc<DeviceShared>) {
    let cfg = shared.config();
    let mut auto_delete = cfg.auto_delete;

    if shared.mount_status() != MountStatus::Mounted {
        shared.set_disk_size(0, 0);
        return;
    }
    match disk_size(&cfg.mount_path) {
        Ok((total, free)) => {
            info!("{}: total {total} KiB, free {free} KiB", cfg.mount_path.display());
            shared.set_disk_size(total, free);
        }
        Err(e) => {
            error!("statfs {} failed: {e}", cfg.mount_path.display());
            shared.set_unmounted();
            return;
        }
    }

    let mut folders = Vec::with_capacity(cfg.folders.len());
    for folder_cfg in &cfg.folders {
        let path = folder_cfg.absolute_path(&cfg.mount_path);
        if let Err(e) = create_folder(&path) {
            error!("create {} failed: {e}", path.display());
            shared.set_unmounted();
            return;
        }
        folders.push(Folder::from_config(path, folder_cfg));
    }
    let folders: Arc<Vec<Folder>> = Arc::new(folders);
    shared.publish_folders(folders.clone());

    let watcher = match FsWatcher::spawn(folders.clone(), shared.clone()) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("filesystem watcher failed to start: {e}");
            shared.clear_folders();
            shared.set_unmounted();
            return;
        }
    };

    if auto_delete {
        for folder in folders.iter() {
            if shared.mount_status() != MountStatus::Mounted {
                break;
            }
            enumerate_folder(folder, &shared);
        }
    }

    let mut cnt: u32 = 0;
    while shared.mount_status() == MountStatus::Mounted {
        cnt += 1;
        if cnt > ACTION_TICKS {
            cnt = 0;

            let (total, free) = match disk_size(&cfg.mount_path) {
                Ok(sizes) => sizes,
                Err(e) => {
                    error!("statfs {} failed: {e}", cfg.mount_path.display());
                    // the watcher polls the same flag
                    shared.set_unmounted();
                    break;
                }
            };
            shared.set_disk_size(total, free);
            auto_delete = hysteresis(auto_delete, free, cfg.free_low_mib, cfg.free_high_mib);

            if auto_delete {
                let sum: u64 = folders.iter().map(|f| f.index().total_space()).sum();
                if sum > 0 {
                    if let Some((slot, name)) = pick_eviction(&folders, sum) {
                        let target = folders[slot].path().join(&name);
                        info!("deleting {}", target.display());
                        if let Err(e) = fs::remove_file(&target) {
                            warn!("delete {} failed: {e}", target.display());
                        }
                        thread::sleep(DELETE_PAUSE);
                        // next tick acts again; one tick is enough for the
                        // watcher to pick up the delete event
                        cnt = ACTION_TICKS + 1;
                    }
                }
            }
        }
        thread::sleep(TICK);
    }

    watcher.join();
    shared.clear_folders();
    info!("scan worker exited");
}

fn create_folder(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

fn enumerate_folder(folder: &Folder, shared: &Arc<DeviceShared>) {
    let entries = match fs::read_dir(folder.path()) {
        Ok(entries) => entries,
        Err(e) => {
            error!("open {} failed: {e}", folder.path().display());
            return;
        }
    };

    let mut inserted = 0usize;
    for entry in entries {
        if shared.mount_status() != MountStatus::Mounted {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("readdir {} failed: {e}", folder.path().display());
                continue;
            }
        };
        let meta = match fs::symlink_metadata(entry.path()) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("stat {} failed: {e}", entry.path().display());
                continue;
            }
        };
        if meta.is_dir() {
            continue;
        }
        let name = entry.file_name();
        folder
            .index()
            .add(&name.to_string_lossy(), FileStat::from(&meta));
        inserted += 1;
        if inserted % SCAN_YIELD_EVERY == 0 {
            thread::sleep(SCAN_PAUSE);
        }
    }

    let index = folder.index();
    info!(
        "{}: {} files, {} bytes ({} on disk)",
        folder.path().display(),
        index.file_count(),
        index.total_size(),
        index.total_space()
    );
}

/// Arms retention at the low-water mark and disarms at the high-water
/// mark; in between the previous state holds. Thresholds are MiB against a
/// KiB sample.
fn hysteresis(armed: bool, free_kib: u64, low_mib: u64, high_mib: u64) -> bool {
    if free_kib <= low_mib * 1024 {
        return true;
    }
    if free_kib >= high_mib * 1024 {
        return false;
    }
    armed
}

/// Picks the next eviction: the first configured folder whose current
/// share (or file count) exceeds its limit gives up the head of its
/// sorted list. `sum_space` must be non-zero.
fn pick_eviction(folders: &[Folder], sum_space: u64) -> Option<(usize, String)> {
    for (slot, folder) in folders.iter().enumerate() {
        let index = folder.index();
        let current = if folder.limit_by_count() {
            index.file_count() as u64
        } else {
            index.total_space() * 100 / sum_space
        };
        if current > folder.limit() {
            if let Some(head) = index.first() {
                return Some((slot, head.name.clone()));
            }
        }
    }
    None
}
