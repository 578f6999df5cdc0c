// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-flight task accounting for a channel.
//!
//! Three counters (reads, writes, and their sum) drive orderly shutdown:
//! close waits for inbound tasks unconditionally and for outbound tasks up
//! to a deadline. The same bookkeeping feeds idle tracking: `idle_since` is
//! `None` exactly while any task is in flight, and is restamped the moment
//! the last task finishes, so the keepalive idle arm never has to poll.

use std::{
    sync::Mutex,
    time::Instant,
};

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Read,
    Write,
}

#[derive(Debug)]
struct Counts {
    reads: u32,
    writes: u32,
    idle_since: Option<Instant>,
}

#[derive(Debug)]
pub struct TaskGroup {
    counts: Mutex<Counts>,
    notify: Notify,
}

/// RAII token for one in-flight task. Dropping it, on success, error or
/// unwind, decrements the counter.
#[derive(Debug)]
pub struct TaskToken<'a> {
    group: &'a TaskGroup,
    kind: TaskKind,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(Counts {
                reads: 0,
                writes: 0,
                idle_since: Some(Instant::now()),
            }),
            notify: Notify::new(),
        }
    }

    pub fn begin(&self, kind: TaskKind) -> TaskToken<'_> {
        if let Ok(mut counts) = self.counts.lock() {
            match kind {
                TaskKind::Read => counts.reads += 1,
                TaskKind::Write => counts.writes += 1,
            }
            counts.idle_since = None;
        }
        TaskToken { group: self, kind }
    }

    fn finish(&self, kind: TaskKind) {
        if let Ok(mut counts) = self.counts.lock() {
            match kind {
                TaskKind::Read => counts.reads -= 1,
                TaskKind::Write => counts.writes -= 1,
            }
            if counts.reads == 0 && counts.writes == 0 {
                counts.idle_since = Some(Instant::now());
            }
        }
        self.notify.notify_waiters();
    }

    pub fn reads(&self) -> u32 {
        self.counts.lock().map(|c| c.reads).unwrap_or(0)
    }

    pub fn writes(&self) -> u32 {
        self.counts.lock().map(|c| c.writes).unwrap_or(0)
    }

    pub fn in_flight(&self) -> u32 {
        self.counts.lock().map(|c| c.reads + c.writes).unwrap_or(0)
    }

    /// `None` while any task is in flight, otherwise the instant the
    /// channel last became idle.
    pub fn idle_since(&self) -> Option<Instant> {
        self.counts.lock().ok().and_then(|c| c.idle_since)
    }

    pub async fn wait_reads(&self) {
        self.wait(|c| c.reads == 0).await;
    }

    pub async fn wait_writes(&self) {
        self.wait(|c| c.writes == 0).await;
    }

    pub async fn wait_all(&self) {
        self.wait(|c| c.reads == 0 && c.writes == 0).await;
    }

    async fn wait(&self, done: impl Fn(&Counts) -> bool) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            let satisfied = self.counts.lock().map(|c| done(&c)).unwrap_or(true);
            if satisfied {
                return;
            }
            notified.await;
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskToken<'_> {
    fn drop(&mut self) {
        self.group.finish(self.kind);
    }
}
