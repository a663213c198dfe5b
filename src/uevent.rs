use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

use crate::msg::{DevMessage, MsgQueue};
use crate::{Result, SdKeeperError};

/// Kernel (1) and udev (2) uevent multicast groups; the parser keeps only
/// udev-origin messages.
const UEVENT_GROUPS: u32 = 1 | 2;

/// Anything shorter cannot carry a device record.
const MIN_MSG_LEN: usize = 32;

const BUF_LEN: usize = 2048;

/// Thread subscribed to kernel device-change broadcasts. Block-device
/// add/remove/change events are forwarded to the message queue; everything
/// else is dropped. Never touches folder state.
pub struct HotplugListener {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl HotplugListener {
    pub fn spawn(queue: Arc<MsgQueue>) -> Result<Self> {
        let socket = open_socket()?;
        let run = Arc::new(AtomicBool::new(true));
        let flag = run.clone();
        let handle = thread::Builder::new()
            .name("event-monitor".into())
            .spawn(move || listen(socket, queue, flag))?;
        Ok(Self { run, handle })
    }

    pub fn stop(self) {
        self.run.store(false, Ordering::Relaxed);
        if self.handle.join().is_err() {
            error!("hot-plug listener panicked");
        }
    }
}

fn open_socket() -> Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            libc::NETLINK_KOBJECT_UEVENT,
        )
    };
    if fd < 0 {
        return Err(SdKeeperError::Netlink(format!(
            "socket: {}",
            io::Error::last_os_error()
        )));
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // 100 ms receive timeout so the thread observes the stop flag
    let timeout = libc::timeval {
        tv_sec: 0,
        tv_usec: 100_000,
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &timeout as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(SdKeeperError::Netlink(format!(
            "setsockopt: {}",
            io::Error::last_os_error()
        )));
    }

    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_groups = UEVENT_GROUPS;
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(SdKeeperError::Netlink(format!(
            "bind: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(socket)
}

fn listen(socket: OwnedFd, queue: Arc<MsgQueue>, run: Arc<AtomicBool>) {
    let mut buf = [0u8; BUF_LEN];

    while run.load(Ordering::Relaxed) {
        let n = unsafe {
            libc::recv(
                socket.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted => continue,
                _ => {
                    error!("uevent recv failed: {err}");
                    break;
                }
            }
        }

        let n = n as usize;
        if n < MIN_MSG_LEN {
            warn!("ignoring short uevent message ({n} bytes)");
            continue;
        }
        if let Some(msg) = parse_uevent(&buf[..n]) {
            debug!("{msg:?}");
            queue.put(msg);
        }
    }

    debug!("hot-plug listener exited");
}

/// Parses one uevent datagram. udev monitor messages open with a "libudev"
/// magic followed by a binary header and NUL-delimited KEY=VALUE records;
/// the scan walks every NUL-separated field so interleaved layouts parse
/// the same as contiguous ones.
pub fn parse_uevent(buf: &[u8]) -> Option<DevMessage> {
    if !buf.starts_with(b"libudev") {
        return None;
    }

    let mut action = None;
    let mut devname = None;
    let mut block_device = false;
    for field in buf
        .split(|b| *b == 0)
        .filter_map(|f| std::str::from_utf8(f).ok())
    {
        if let Some(v) = field.strip_prefix("ACTION=") {
            action = Some(v);
        } else if let Some(v) = field.strip_prefix("DEVNAME=") {
            devname = Some(v);
        } else if matches!(field, "DEVTYPE=partition" | "DEVTYPE=disk") {
            block_device = true;
        }
    }

    if !block_device {
        return None;
    }
    let dev = devname?.to_string();
    match action? {
        "add" => Some(DevMessage::Add(dev)),
        "remove" => Some(DevMessage::Remove(dev)),
        "change" => Some(DevMessage::Changed(dev)),
        _ => None,
    }
}
