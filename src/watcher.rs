use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::index::{FileStat, Folder};
use crate::storage::{DeviceShared, MountStatus};
use crate::Result;

/// Poll cadence; bounds how long the thread takes to observe unmount.
const POLL_WAIT: Duration = Duration::from_millis(10);

/// Thread that keeps every folder index in step with the filesystem.
/// Registered per mounted episode; exits once the device reports
/// Unmounted.
pub struct FsWatcher {
    handle: JoinHandle<()>,
}

impl FsWatcher {
    /// Watch registration happens on the caller's thread; a folder that
    /// cannot be watched fails the spawn.
    pub fn spawn(folders: Arc<Vec<Folder>>, shared: Arc<DeviceShared>) -> Result<Self> {
        let mut inotify = Inotify::init()?;
        let mut slots: HashMap<WatchDescriptor, usize> = HashMap::new();
        for (slot, folder) in folders.iter().enumerate() {
            let wd = inotify.watches().add(
                folder.path(),
                WatchMask::CREATE
                    | WatchMask::MOVED_TO
                    | WatchMask::CLOSE_WRITE
                    | WatchMask::DELETE
                    | WatchMask::MOVED_FROM,
            )?;
            slots.insert(wd, slot);
        }

        let handle = thread::Builder::new()
            .name("file-monitor".into())
            .spawn(move || run(inotify, slots, folders, shared))?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("filesystem watcher panicked");
        }
    }
}

fn run(
    mut inotify: Inotify,
    slots: HashMap<WatchDescriptor, usize>,
    folders: Arc<Vec<Folder>>,
    shared: Arc<DeviceShared>,
) {
    let mut buffer = [0u8; 4096];

    while shared.mount_status() == MountStatus::Mounted {
        let events = match inotify.read_events(&mut buffer) {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_WAIT);
                continue;
            }
            Err(e) => {
                error!("inotify read failed: {e}");
                break;
            }
        };

        for event in events {
            if event.mask.contains(EventMask::UNMOUNT) {
                shared.set_unmounted();
            }

            let Some(name) = event.name else { continue };
            let Some(&slot) = slots.get(&event.wd) else {
                continue;
            };
            let folder = &folders[slot];
            let name = name.to_string_lossy();

            if event
                .mask
                .intersects(EventMask::CREATE | EventMask::MOVED_TO | EventMask::CLOSE_WRITE)
            {
                let full = folder.path().join(name.as_ref());
                match fs::symlink_metadata(&full) {
                    Ok(meta) => folder.index().add(&name, FileStat::from(&meta)),
                    Err(e) => warn!("stat {} failed: {e}", full.display()),
                }
            }

            if event
                .mask
                .intersects(EventMask::DELETE | EventMask::MOVED_FROM)
            {
                folder.index().remove(&name);
            }
        }
    }

    debug!("filesystem watcher exited");
}
