// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Coarse-grained timer service and the monotonic clock the keepalive
//! machinery reads.

use std::time::Instant;

use once_cell::sync::Lazy;

pub mod wheel;

pub use wheel::{TimerHandle, TimingWheel, shutdown_global, wheel};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the process epoch. Cheap enough for the
/// per-message read/write stamps.
pub fn now_nanos() -> i64 {
    EPOCH.elapsed().as_nanos() as i64
}
