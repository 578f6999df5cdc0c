// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bounded free-lists for reader and writer buffers.
//!
//! Every connection acquires its backing buffers here and its drop path
//! returns them, so steady-state traffic allocates nothing per message.
//! The lists are bounded: once full, returned buffers are simply dropped.
//! Buffers that grew past `max_retained_capacity` are not pooled again,
//! which keeps one pathological frame from pinning memory forever.

use std::sync::Mutex;

pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    initial_capacity: usize,
    max_pooled: usize,
    max_retained_capacity: usize,
}

/// Free-list for read-side buffers.
pub static READ_BUFFERS: BufferPool = BufferPool::new(256, 128, 1 << 20);

/// Free-list for write-side staging buffers.
pub static WRITE_BUFFERS: BufferPool = BufferPool::new(1024, 128, 1 << 20);

impl BufferPool {
    pub const fn new(
        initial_capacity: usize,
        max_pooled: usize,
        max_retained_capacity: usize,
    ) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            initial_capacity,
            max_pooled,
            max_retained_capacity,
        }
    }

    /// Pops a recycled buffer or allocates a fresh one. The returned buffer
    /// is always empty (`len == 0`).
    pub fn acquire(&self) -> Vec<u8> {
        if let Ok(mut pooled) = self.buffers.lock() {
            if let Some(buf) = pooled.pop() {
                return buf;
            }
        }
        Vec::with_capacity(self.initial_capacity)
    }

    /// Returns a buffer to the pool. Oversized or surplus buffers are
    /// dropped instead of retained.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_retained_capacity {
            return;
        }
        buf.clear();
        if let Ok(mut pooled) = self.buffers.lock() {
            if pooled.len() < self.max_pooled {
                pooled.push(buf);
            }
        }
    }
}
