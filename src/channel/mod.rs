// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-connection channel.
//!
//! A [`Channel`] is one-to-one with an underlying byte-stream connection
//! for its whole life. Its read/write availability is a two-bit atomic
//! state; the all-zero state is terminal. Activation runs the `OnChannel`
//! hook chain and only then raises both bits, so hooks always observe an
//! inactive channel and may still append channel-private middleware.
//!
//! Close is a single-winner race: the winner drains inbound tasks, fires
//! `OnChannelClosed` against a quiesced inbound pipeline, drains outbound
//! tasks up to a deadline, releases the pipeline to its pool and closes the
//! connection.

use std::{
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use bitflags::bitflags;
use tokio::time::timeout;
use tracing::debug;

use crate::{
    context::Context,
    error::Error,
    middleware::{Handler, Middleware, OnChannelClosed},
    timer::now_nanos,
    transport::conn::Conn,
};

pub mod pipeline;
pub mod tasks;

pub use pipeline::{Pipeline, PipelineFactory};
pub use tasks::{TaskGroup, TaskKind};

bitflags! {
    /// Read/write availability. All-zero is the terminal closed state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelState: u32 {
        const READABLE = 0b01;
        const WRITEABLE = 0b10;
    }
}

/// Which end of the connection this channel sits on. Server-side keepalive
/// policies (idle timeout, max age) do not apply to client channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

pub struct Channel<M> {
    id: u64,
    // handlers receive an owned `Arc<Channel>`; this is where non-Arc
    // methods get one from
    self_ref: Weak<Channel<M>>,
    conn: Arc<Conn>,
    side: Side,
    state: AtomicU32,
    closed: AtomicBool,
    ctx: RwLock<Context>,
    tasks: TaskGroup,
    last_read: AtomicI64,
    last_write: AtomicI64,
    pipeline: RwLock<Option<Pipeline<M>>>,
}

impl<M: Send + 'static> Channel<M> {
    pub(crate) fn new(id: u64, conn: Arc<Conn>, side: Side, pipeline: Pipeline<M>) -> Arc<Self> {
        let now = now_nanos();
        Arc::new_cyclic(|weak| Self {
            id,
            self_ref: weak.clone(),
            conn,
            side,
            state: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            ctx: RwLock::new(Context::new()),
            tasks: TaskGroup::new(),
            last_read: AtomicI64::new(now),
            last_write: AtomicI64::new(now),
            pipeline: RwLock::new(Some(pipeline)),
        })
    }

    fn self_arc(&self) -> Result<Arc<Self>, Error> {
        // the weak upgrades for as long as any Arc to this channel exists
        self.self_ref.upgrade().ok_or(Error::AlreadyClosed)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    pub fn remote_addr(&self) -> Option<std::net::SocketAddr> {
        self.conn.peer_addr()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.conn.local_addr()
    }

    /// The channel's propagation context.
    pub fn context(&self) -> Context {
        self.ctx.read().map(|ctx| ctx.clone()).unwrap_or_default()
    }

    /// Replaces the propagation context. Only well-defined from within
    /// `OnChannel` hook execution; use from anywhere else races pipeline
    /// runs reading the context.
    pub fn set_context(&self, ctx: Context) {
        if let Ok(mut slot) = self.ctx.write() {
            *slot = ctx;
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub fn readable(&self) -> bool {
        self.state().contains(ChannelState::READABLE)
    }

    pub fn writeable(&self) -> bool {
        self.state().contains(ChannelState::WRITEABLE)
    }

    /// True while the channel has any availability bit set and the
    /// underlying connection is alive.
    pub fn is_active(&self) -> bool {
        !self.state().is_empty() && self.conn.is_active()
    }

    /// Clears the readable bit; in-flight inbound tasks finish, new ones
    /// are refused.
    pub fn close_reader(&self) {
        self.state
            .fetch_and(!ChannelState::READABLE.bits(), Ordering::AcqRel);
    }

    /// Clears the writeable bit; subsequent writes fail `WriterClosed`.
    pub fn close_writer(&self) {
        self.state
            .fetch_and(!ChannelState::WRITEABLE.bits(), Ordering::AcqRel);
    }

    pub(crate) fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// Instant the channel last became idle; `None` while tasks run.
    pub fn idle_since(&self) -> Option<Instant> {
        self.tasks.idle_since()
    }

    pub(crate) fn last_read_nanos(&self) -> i64 {
        self.last_read.load(Ordering::Acquire)
    }

    /// Appends a channel-private close hook. Must only be called from the
    /// `OnChannel` hook chain, before messages flow.
    pub fn add_on_channel_closed(&self, hook: OnChannelClosed<M>) {
        if let Ok(mut slot) = self.pipeline.write() {
            if let Some(pipeline) = slot.as_mut() {
                pipeline.add_on_channel_closed(hook);
            }
        }
    }

    /// Appends a channel-private inbound middleware. Must only be called
    /// from the `OnChannel` hook chain.
    pub fn add_inbound_middleware(&self, mw: Middleware<M>) {
        if let Ok(mut slot) = self.pipeline.write() {
            if let Some(pipeline) = slot.as_mut() {
                pipeline.add_inbound(mw);
            }
        }
    }

    /// Appends a channel-private outbound middleware. Must only be called
    /// from the `OnChannel` hook chain.
    pub fn add_outbound_middleware(&self, mw: Middleware<M>) {
        if let Ok(mut slot) = self.pipeline.write() {
            if let Some(pipeline) = slot.as_mut() {
                pipeline.add_outbound(mw);
            }
        }
    }

    /// Runs the `OnChannel` hook chain and, if every hook succeeds, marks
    /// the channel readable and writeable. Each hook may replace the
    /// stored context; the first error aborts activation.
    pub(crate) async fn activate(&self, ctx: Context) -> Result<(), Error> {
        let this = self.self_arc()?;
        let hooks = {
            let slot = self.pipeline.read().map_err(|_| Error::AlreadyClosed)?;
            slot.as_ref()
                .map(|pipeline| pipeline.on_channel_chain())
                .ok_or(Error::AlreadyClosed)?
        };

        let mut ctx = ctx;
        self.set_context(ctx.clone());
        for hook in hooks.iter() {
            ctx = hook(ctx, Arc::clone(&this)).await?;
            self.set_context(ctx.clone());
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }
        self.state.store(
            (ChannelState::READABLE | ChannelState::WRITEABLE).bits(),
            Ordering::Release,
        );
        Ok(())
    }

    /// Sends a message down the outbound pipeline: channel-private
    /// middleware first, then the common chain, then the terminal write
    /// handler. Callers never block on the socket beyond the writer mutex.
    pub async fn write(&self, msg: M) -> Result<(), Error> {
        let _task = self.tasks.begin(TaskKind::Write);
        if !self.writeable() {
            return Err(Error::WriterClosed);
        }
        self.last_write.store(now_nanos(), Ordering::Release);

        let composed = self.compose(Pipeline::compose_outbound)?;
        composed(self.context(), self.self_arc()?, msg).await
    }

    /// Sends a message through the common outbound chain only, skipping
    /// channel-private middleware. The keepalive keeper uses this for
    /// pings and go-aways.
    pub async fn write_directly(&self, msg: M) -> Result<(), Error> {
        let _task = self.tasks.begin(TaskKind::Write);
        if !self.writeable() {
            return Err(Error::WriterClosed);
        }
        self.last_write.store(now_nanos(), Ordering::Release);

        let composed = self.compose(Pipeline::compose_outbound_direct)?;
        composed(self.context(), self.self_arc()?, msg).await
    }

    /// Runs one inbound message through the pipeline. Refused while the
    /// readable bit is clear.
    pub(crate) async fn trigger_inbound(&self, msg: M) -> Result<(), Error> {
        let _task = self.tasks.begin(TaskKind::Read);
        if !self.readable() {
            return Err(Error::ReaderClosed);
        }
        self.last_read.store(now_nanos(), Ordering::Release);

        let composed = self.compose(Pipeline::compose_inbound)?;
        composed(self.context(), self.self_arc()?, msg).await
    }

    fn compose(&self, build: impl Fn(&Pipeline<M>) -> Handler<M>) -> Result<Handler<M>, Error> {
        let slot = self.pipeline.read().map_err(|_| Error::AlreadyClosed)?;
        slot.as_ref().map(|pipeline| build(pipeline)).ok_or(Error::AlreadyClosed)
    }

    /// Gracefully closes the channel and waits for the teardown sequence.
    /// `drain_bound` caps the wait for in-flight *outbound* tasks only;
    /// inbound tasks are always drained fully.
    pub async fn close(&self, drain_bound: Option<Duration>, reason: Error) -> Result<(), Error> {
        let teardown = self.begin_close(drain_bound, reason)?;
        teardown.await.map_err(|e| Error::Panic(e.to_string()))
    }

    /// CASes the channel into the closed state and spawns the teardown
    /// sequence. The non-awaiting form exists for callers inside the
    /// inbound pipeline, since awaiting the inbound drain from an inbound task
    /// would deadlock.
    pub fn begin_close(
        &self,
        drain_bound: Option<Duration>,
        reason: Error,
    ) -> Result<tokio::task::JoinHandle<()>, Error> {
        let ch = self.self_arc()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }
        self.state.store(0, Ordering::Release);

        Ok(tokio::spawn(async move {
            ch.teardown(drain_bound, reason).await;
        }))
    }

    async fn teardown(self: Arc<Self>, drain_bound: Option<Duration>, reason: Error) {
        // inbound pipeline must quiesce before close hooks observe the
        // channel; hooks may hold channel-bound state
        self.tasks().wait_reads().await;

        let (ctx, closed_chain) = {
            match self.pipeline.read() {
                Ok(slot) => (
                    self.context(),
                    slot.as_ref()
                        .map(Pipeline::on_channel_closed_chain)
                        .unwrap_or_default(),
                ),
                Err(_) => (self.context(), Vec::new()),
            }
        };
        for hook in closed_chain {
            hook(ctx.clone(), Arc::clone(&self), reason.clone()).await;
        }

        match drain_bound {
            Some(bound) => {
                if timeout(bound, self.tasks.wait_writes()).await.is_err() {
                    debug!(
                        channel = self.id,
                        pending = self.tasks.writes(),
                        "outbound drain timed out"
                    );
                }
            }
            None => self.tasks.wait_writes().await,
        }

        if let Ok(mut slot) = self.pipeline.write() {
            if let Some(pipeline) = slot.take() {
                pipeline.release();
            }
        }
        self.conn.close().await;
        debug!(channel = self.id, %reason, "channel closed");
    }
}

impl<M> std::fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("side", &self.side)
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("peer", &self.conn.peer_addr())
            .field("last_read", &self.last_read.load(Ordering::Relaxed))
            .field("last_write", &self.last_write.load(Ordering::Relaxed))
            .finish()
    }
}
