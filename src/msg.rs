use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Device event forwarded from the hot-plug listener to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevMessage {
    Add(String),
    Remove(String),
    Changed(String),
}

struct Inner {
    queue: VecDeque<DevMessage>,
    closed: bool,
}

/// FIFO between the hot-plug listener and the single consumer thread.
/// `put` never blocks the producer; the consumer drains with a bounded
/// wait so it can observe `close`.
pub struct MsgQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl MsgQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn put(&self, msg: DevMessage) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.queue.push_back(msg);
        self.not_empty.notify_one();
    }

    /// Returns the head within `timeout`, or `None`. Pending messages are
    /// still handed out after `close` so the consumer can drain.
    pub fn get_timeout(&self, timeout: Duration) -> Option<DevMessage> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |inner| {
                inner.queue.is_empty() && !inner.closed
            })
            .unwrap();
        inner.queue.pop_front()
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}
