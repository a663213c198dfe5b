use clap::Parser;
use sdkeeper::config::{Args, DeviceConfig};
use sdkeeper::storage::{MountStatus, Storage};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    // log to stderr so the status output stays pipeable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let mut config = match &args.config {
        Some(path) => DeviceConfig::from_file(path)?,
        None => DeviceConfig::default(),
    };
    if let Some(mount_path) = args.mount_path {
        config.mount_path = mount_path;
    }

    let storage = Storage::init(Some(config))?;
    info!("storage manager running");

    loop {
        std::thread::sleep(Duration::from_secs(args.status_interval));
        match storage.mount_status() {
            MountStatus::Mounted => {
                let (total, free) = storage.disk_size().unwrap_or((0, 0));
                let device = storage.device_path().unwrap_or_default();
                info!("{device}: {free} KiB free of {total} KiB");
            }
            MountStatus::Unmounted => info!("waiting for medium"),
        }
    }
}
