// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Hashed timing wheel.
//!
//! One wheel instance serves every keepalive keeper in the process: a
//! channel needs up to three timers, and at thousands of channels that is
//! far too many for individual runtime timers. The wheel trades accuracy
//! for constant-time scheduling. Callbacks fire on tick granularity
//! (milliseconds to seconds) and must not block.
//!
//! The ticker is a dedicated thread, not a runtime task, so the wheel's
//! lifetime is independent of any particular async runtime. Callbacks run
//! on that thread; anything asynchronous (a keepalive probe, a close) is
//! spawned onto a runtime handle the scheduling side captured.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use tracing::error;

const DEFAULT_TICK: Duration = Duration::from_millis(10);
const DEFAULT_SLOTS: usize = 512;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    rounds: u64,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

/// Cancels the associated timer. Cancellation is advisory: a callback
/// already running is not interrupted.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once the timer fired or was cancelled.
    pub fn is_spent(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub struct TimingWheel {
    slots: Vec<Mutex<Vec<Entry>>>,
    cursor: AtomicUsize,
    tick: Duration,
    stopped: AtomicBool,
}

impl TimingWheel {
    /// Creates a wheel and starts its ticker thread.
    pub fn start(tick: Duration, slots: usize) -> Arc<Self> {
        let wheel = Arc::new(Self {
            slots: (0..slots).map(|_| Mutex::new(Vec::new())).collect(),
            cursor: AtomicUsize::new(0),
            tick,
            stopped: AtomicBool::new(false),
        });

        let ticker = Arc::clone(&wheel);
        let spawned = thread::Builder::new()
            .name("framewire-timer".to_string())
            .spawn(move || ticker.run());
        if let Err(err) = spawned {
            error!(%err, "failed to start timer thread");
        }
        wheel
    }

    /// Schedules `callback` to run once after roughly `delay`, rounded up
    /// to tick granularity.
    pub fn after_func(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let ticks = delay.as_nanos().div_ceil(self.tick.as_nanos()).max(1) as u64;
        let slots = self.slots.len() as u64;
        let cursor = self.cursor.load(Ordering::Acquire) as u64;
        let slot = ((cursor + ticks) % slots) as usize;
        let rounds = (ticks - 1) / slots;

        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            rounds,
            cancelled: Arc::clone(&cancelled),
            callback: Box::new(callback),
        };
        if let Ok(mut pending) = self.slots[slot].lock() {
            pending.push(entry);
        }
        TimerHandle { cancelled }
    }

    /// Stops the ticker thread. Pending timers never fire.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn run(self: Arc<Self>) {
        let mut next = Instant::now() + self.tick;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
            // fixed cadence; a late tick does not shift the schedule
            next += self.tick;
            self.advance();
        }
    }

    fn advance(&self) {
        let cursor =
            (self.cursor.load(Ordering::Acquire) + 1) % self.slots.len();
        self.cursor.store(cursor, Ordering::Release);

        let due = {
            let Ok(mut pending) = self.slots[cursor].lock() else {
                return;
            };
            let mut due = Vec::new();
            let mut idx = 0;
            while idx < pending.len() {
                if pending[idx].cancelled.load(Ordering::Acquire) {
                    drop(pending.swap_remove(idx));
                } else if pending[idx].rounds == 0 {
                    due.push(pending.swap_remove(idx));
                } else {
                    pending[idx].rounds -= 1;
                    idx += 1;
                }
            }
            due
        };

        for entry in due {
            if entry.cancelled.swap(true, Ordering::AcqRel) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(entry.callback)).is_err() {
                error!("timer callback panicked");
            }
        }
    }
}

static GLOBAL: OnceCell<Arc<TimingWheel>> = OnceCell::new();

/// The process-wide wheel, lazily started on first use.
pub fn wheel() -> &'static Arc<TimingWheel> {
    GLOBAL.get_or_init(|| TimingWheel::start(DEFAULT_TICK, DEFAULT_SLOTS))
}

/// Stops the process-wide wheel during framework teardown. Irreversible:
/// keepalive stops firing for every transport in the process.
pub fn shutdown_global() {
    if let Some(wheel) = GLOBAL.get() {
        wheel.shutdown();
    }
}
