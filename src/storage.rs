use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::index::{FileInfo, Folder, ListOrder};
use crate::mounts::{self, MountEntry};
use crate::msg::{DevMessage, MsgQueue};
use crate::scanner::{self, ScanWorker};
use crate::uevent::HotplugListener;
use crate::{Result, SdKeeperError};

const CONSUMER_WAIT: Duration = Duration::from_millis(50);
const FSCK_BIN: &str = "/sbin/fsck.fat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
    Unmounted,
    Mounted,
}

/// Identity of the mounted medium, captured from its mount table entry.
#[derive(Debug, Clone)]
pub(crate) struct DeviceInfo {
    pub dev_path: String,
    pub dev_type: String,
    pub dev_attrs: String,
}

impl From<MountEntry> for DeviceInfo {
    fn from(entry: MountEntry) -> Self {
        Self {
            dev_path: entry.device,
            dev_type: entry.fs_type,
            dev_attrs: entry.options,
        }
    }
}

/// State shared between the controller, the scan worker, and the
/// filesystem watcher. The folder array exists only while a medium is
/// mounted; `mount_status` is a plain atomic that every thread polls.
pub struct DeviceShared {
    config: DeviceConfig,
    mounted: AtomicBool,
    total_kib: AtomicU64,
    free_kib: AtomicU64,
    device: Mutex<Option<DeviceInfo>>,
    folders: RwLock<Option<Arc<Vec<Folder>>>>,
    worker: Mutex<Option<ScanWorker>>,
}

impl DeviceShared {
    pub(crate) fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            mounted: AtomicBool::new(false),
            total_kib: AtomicU64::new(0),
            free_kib: AtomicU64::new(0),
            device: Mutex::new(None),
            folders: RwLock::new(None),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn mount_status(&self) -> MountStatus {
        if self.mounted.load(Ordering::Relaxed) {
            MountStatus::Mounted
        } else {
            MountStatus::Unmounted
        }
    }

    pub(crate) fn set_mounted(&self) {
        self.mounted.store(true, Ordering::Relaxed);
    }

    pub fn set_unmounted(&self) {
        self.mounted.store(false, Ordering::Relaxed);
    }

    pub(crate) fn set_disk_size(&self, total_kib: u64, free_kib: u64) {
        self.total_kib.store(total_kib, Ordering::Relaxed);
        self.free_kib.store(free_kib, Ordering::Relaxed);
    }

    pub(crate) fn disk_size_cached(&self) -> (u64, u64) {
        (
            self.total_kib.load(Ordering::Relaxed),
            self.free_kib.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn set_device(&self, info: Option<DeviceInfo>) {
        *self.device.lock().unwrap() = info;
    }

    pub(crate) fn device_path(&self) -> Option<String> {
        self.device
            .lock()
            .unwrap()
            .as_ref()
            .map(|info| info.dev_path.clone())
    }

    pub(crate) fn publish_folders(&self, folders: Arc<Vec<Folder>>) {
        *self.folders.write().unwrap() = Some(folders);
    }

    pub(crate) fn clear_folders(&self) {
        *self.folders.write().unwrap() = None;
    }

    pub(crate) fn folders(&self) -> Option<Arc<Vec<Folder>>> {
        self.folders.read().unwrap().clone()
    }

    pub(crate) fn store_worker(&self, worker: ScanWorker) {
        *self.worker.lock().unwrap() = Some(worker);
    }

    pub(crate) fn take_worker(&self) -> Option<ScanWorker> {
        self.worker.lock().unwrap().take()
    }
}

/// The storage manager handle. Owns the hot-plug listener, the message
/// consumer, and (while a medium is mounted) the scan worker; all of them
/// are joined on `close`.
pub struct Storage {
    shared: Arc<DeviceShared>,
    queue: Arc<MsgQueue>,
    listener: Option<HotplugListener>,
    consumer: Option<JoinHandle<()>>,
}

impl Storage {
    /// Applies `config` (or the defaults), attaches immediately if the
    /// medium is already mounted, and starts the event plumbing.
    pub fn init(config: Option<DeviceConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        config.validate()?;
        for folder in &config.folders {
            info!(
                "managing {} sort={:?} limit={}{}",
                folder.absolute_path(&config.mount_path).display(),
                folder.sort,
                folder.limit,
                if folder.limit_by_count { " files" } else { "%" },
            );
        }

        let shared = Arc::new(DeviceShared::new(config));

        match mounts::entry_for_mount_point(&shared.config().mount_path) {
            Ok(entry) => {
                info!("{} already mounted on {}", entry.device, entry.mount_point.display());
                shared.set_device(Some(entry.into()));
                shared.set_mounted();
                let worker = ScanWorker::spawn(shared.clone())?;
                shared.store_worker(worker);
            }
            Err(e) => {
                info!("{}: not mounted yet ({e})", shared.config().mount_path.display());
            }
        }

        let queue = Arc::new(MsgQueue::new());
        let consumer = {
            let queue = queue.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name("dev-msg".into())
                .spawn(move || consume(queue, shared))
        };
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                shared.set_unmounted();
                if let Some(worker) = shared.take_worker() {
                    worker.join();
                }
                return Err(e.into());
            }
        };

        let listener = match HotplugListener::spawn(queue.clone()) {
            Ok(listener) => listener,
            Err(e) => {
                queue.close();
                let _ = consumer.join();
                shared.set_unmounted();
                if let Some(worker) = shared.take_worker() {
                    worker.join();
                }
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            queue,
            listener: Some(listener),
            consumer: Some(consumer),
        })
    }

    pub fn mount_status(&self) -> MountStatus {
        self.shared.mount_status()
    }

    /// Filesystem totals in KiB, re-sampled on call while mounted.
    pub fn disk_size(&self) -> Result<(u64, u64)> {
        if self.mount_status() == MountStatus::Mounted {
            let (total, free) = scanner::disk_size(&self.shared.config().mount_path)?;
            self.shared.set_disk_size(total, free);
        } else {
            self.shared.set_disk_size(0, 0);
        }
        Ok(self.shared.disk_size_cached())
    }

    /// Snapshot of the index for `path`, which must be one of the managed
    /// folders. Order is relative to the folder's configured sort key.
    pub fn list_files(&self, path: impl AsRef<Path>, order: ListOrder) -> Result<Vec<FileInfo>> {
        let path = path.as_ref();
        let (folders, slot) = self.find_folder(path)?;
        let snapshot = folders[slot].index().snapshot(order);
        Ok(snapshot)
    }

    pub fn file_count(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let (folders, slot) = self.find_folder(path)?;
        let count = folders[slot].index().file_count();
        Ok(count)
    }

    pub fn device_path(&self) -> Option<String> {
        self.shared.device_path()
    }

    fn find_folder(&self, path: &Path) -> Result<(Arc<Vec<Folder>>, usize)> {
        let folders = self
            .shared
            .folders()
            .ok_or_else(|| SdKeeperError::FolderNotFound(path.to_path_buf()))?;
        let slot = folders
            .iter()
            .position(|folder| folder.matches(path))
            .ok_or_else(|| SdKeeperError::FolderNotFound(path.to_path_buf()))?;
        Ok((folders, slot))
    }

    /// Stops and joins every thread. Idempotent; also run by `Drop`.
    pub fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        self.queue.close();
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        self.shared.set_unmounted();
        self.shared.set_disk_size(0, 0);
        if let Some(worker) = self.shared.take_worker() {
            worker.join();
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.close();
    }
}

fn consume(queue: Arc<MsgQueue>, shared: Arc<DeviceShared>) {
    loop {
        match queue.get_timeout(CONSUMER_WAIT) {
            Some(msg) => handle_message(&shared, msg),
            None => {
                if queue.is_closed() {
                    break;
                }
            }
        }
    }
    debug!("message consumer exited");
}

fn handle_message(shared: &Arc<DeviceShared>, msg: DevMessage) {
    match msg {
        DevMessage::Add(dev) => {
            if let Err(e) = dev_add(shared, &dev) {
                error!("attach of {dev} rejected: {e}");
            }
        }
        DevMessage::Remove(dev) => dev_remove(shared, &dev),
        DevMessage::Changed(dev) => debug!("{dev} changed, ignored"),
    }
}

fn dev_add(shared: &Arc<DeviceShared>, dev: &str) -> Result<()> {
    if shared.mount_status() == MountStatus::Mounted {
        debug!("already mounted, ignoring add of {dev}");
        return Ok(());
    }

    let config = shared.config();
    let mount_point = mounts::mount_point_for_device(dev)?;
    if mount_point != config.mount_path {
        return Err(SdKeeperError::MountMismatch {
            device: dev.to_string(),
            mount_point,
        });
    }

    let entry = mounts::entry_for_mount_point(&config.mount_path)?;
    info!("{} attached on {}", entry.device, entry.mount_point.display());
    run_fsck(&entry.device);
    shared.set_device(Some(entry.into()));
    shared.set_mounted();
    thread::sleep(Duration::from_millis(10));

    let worker = match ScanWorker::spawn(shared.clone()) {
        Ok(worker) => worker,
        Err(e) => {
            // leave the device detached so the next add can retry
            shared.set_unmounted();
            return Err(e);
        }
    };
    shared.store_worker(worker);
    Ok(())
}

fn dev_remove(shared: &Arc<DeviceShared>, dev: &str) {
    let matches = shared
        .device_path()
        .is_some_and(|path| path == dev || path.ends_with(&format!("/{dev}")));
    if !matches {
        return;
    }

    info!("{dev} detached");
    shared.set_unmounted();
    shared.set_disk_size(0, 0);
    if let Some(worker) = shared.take_worker() {
        worker.join();
    }
}

/// Launches the filesystem repair tool against the attached device.
/// Advisory; the result is not awaited beyond reaping the child.
fn run_fsck(dev: &str) {
    match Command::new(FSCK_BIN).arg("-a").arg(dev).spawn() {
        Ok(mut child) => {
            thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => warn!("{FSCK_BIN} {dev} failed to start: {e}"),
    }
}
