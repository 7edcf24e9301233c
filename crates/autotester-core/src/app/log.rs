//! Bounded in-memory activity log.
//!
//! The user-facing journal served by `GET /log`: at most 100 timestamped
//! lines, oldest dropped on overflow. Every append also emits a tracing
//! event so the operational log carries the same narrative.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Local;

use crate::ports::clock::Clock;

pub const LOG_CAPACITY: usize = 100;

pub struct ActivityLog {
    clock: Arc<dyn Clock>,
    lines: Mutex<VecDeque<String>>,
}

impl ActivityLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lines: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
        }
    }

    pub fn append(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::info!(target: "autotester::activity", "{msg}");

        let stamp = self
            .clock
            .now()
            .with_timezone(&Local)
            .format("%H:%M:%S");
        let mut lines = self.lines.lock().expect("activity log poisoned");
        if lines.len() == LOG_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(format!("[{stamp}] {msg}"));
    }

    /// Copy-out of the ring, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("activity log poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
