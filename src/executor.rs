// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bounded worker pool for inbound dispatch.
//!
//! The read driver decodes frames in wire order but must never run
//! application code itself, so every decoded message is submitted here.
//! Capacity is a semaphore over plain `tokio::spawn`; what happens when the
//! pool is full is the [`Spillover`] policy.

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::warn;

/// Default pool capacity.
pub const DEFAULT_POOL_SIZE: usize = 1 << 16;

/// Behavior when the pool has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Spillover {
    /// Run the task anyway on a plain spawned task. Never delays the read
    /// loop, at the cost of unbounded concurrency under overload.
    #[default]
    Unbounded,
    /// Wait for a slot, which backpressures the submitting read loop and,
    /// through it, the peer's TCP stream.
    Backpressure,
}

pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    spillover: Spillover,
    capacity: usize,
}

impl TaskPool {
    pub fn new(capacity: usize, spillover: Spillover) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            spillover,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Submits a task. Returns the join handle so callers can observe
    /// panics; completion is otherwise fire-and-forget.
    pub async fn submit<F>(&self, task: F) -> JoinHandle<()>
    where F: Future<Output = ()> + Send + 'static {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => tokio::spawn(async move {
                task.await;
                drop(permit);
            }),
            Err(_) => match self.spillover {
                Spillover::Unbounded => {
                    warn!(capacity = self.capacity, "task pool exhausted, spilling over");
                    tokio::spawn(task)
                }
                Spillover::Backpressure => {
                    match Arc::clone(&self.semaphore).acquire_owned().await {
                        Ok(permit) => tokio::spawn(async move {
                            task.await;
                            drop(permit);
                        }),
                        // the semaphore is never closed; treat it like
                        // spillover if that ever changes
                        Err(_) => tokio::spawn(task),
                    }
                }
            },
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, Spillover::default())
    }
}
