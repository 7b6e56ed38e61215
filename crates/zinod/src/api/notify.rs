//! The notify channel (port 8002).
//!
//! On connect the server sends a one-shot nonce and nothing else; the
//! client ties the channel to a command session with NTIE. Once tied, every
//! event change becomes one `<id> <change-kind> <value>` line. Queues are
//! bounded; a slow client loses its oldest lines, marked by a single
//! coalesced `0 scavenged <n>` line at the queue head.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use zino_core::events::Event;

/// Maximum queued lines per notify session.
pub const NOTIFY_QUEUE_LIMIT: usize = 512;

const SCAVENGE_PREFIX: &str = "0 scavenged ";

/// One connected notify client.
pub struct NotifyChannel {
    pub nonce: String,
    queue: Mutex<VecDeque<String>>,
    wakeup: Notify,
    tied: AtomicBool,
    closed: AtomicBool,
}

impl NotifyChannel {
    pub fn new(nonce: String) -> Self {
        Self {
            nonce,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            tied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Asks the serving task to say goodbye and hang up; called when the
    /// tied command session ends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks this channel as tied to a command session. Returns false if it
    /// was already tied.
    pub fn tie(&self) -> bool {
        !self.tied.swap(true, Ordering::SeqCst)
    }

    pub fn is_tied(&self) -> bool {
        self.tied.load(Ordering::SeqCst)
    }

    /// Queues one line, scavenging the oldest on overflow.
    pub fn push(&self, line: String) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= NOTIFY_QUEUE_LIMIT {
            let mut dropped: u64 = 0;
            if let Some(front) = queue.front() {
                if let Some(n) = front.strip_prefix(SCAVENGE_PREFIX).and_then(|n| n.parse().ok()) {
                    dropped = n;
                    queue.pop_front();
                }
            }
            queue.pop_front();
            dropped += 1;
            queue.push_front(format!("{SCAVENGE_PREFIX}{dropped}"));
        }
        queue.push_back(line);
        drop(queue);
        self.wakeup.notify_one();
    }

    /// Takes all queued lines.
    pub fn drain(&self) -> Vec<String> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Waits until new lines may be available.
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

/// Renders the notify lines for one committed event change.
///
/// A creation emits the state line alone; later commits emit one line per
/// changed attribute, with `log`/`history` as their own change kinds.
pub fn lines_for(event: &Event, old: Option<&Event>) -> Vec<String> {
    let id = event.id;
    let Some(old) = old else {
        return vec![format!("{id} state {}", event.state)];
    };
    event
        .diff_fields(old)
        .into_iter()
        .map(|field| match field {
            "state" => format!("{id} state {}", event.state),
            "log" => format!("{id} log log"),
            "history" => format!("{id} history history"),
            attr => format!("{id} attr {attr}"),
        })
        .collect()
}
