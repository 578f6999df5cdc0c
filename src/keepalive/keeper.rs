// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-channel keepalive state machine.
//!
//! A keeper runs up to three independent timer arms on the shared timing
//! wheel: idle timeout and max age (server side), and the ping/pong health
//! probe. Wheel callbacks must not block, so each firing spawns a short
//! task that reads the channel through a weak handle; the keeper never
//! keeps a channel alive on its own.
//!
//! Every transition is guarded by the `done` flag: the keeper is retired
//! either by its own hard close or by the channel closing for any other
//! reason, and retirement cancels every outstanding timer.

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use tracing::{debug, error, info};

use crate::{
    channel::{Channel, Side},
    error::Error,
    keepalive::KeepaliveParams,
    timer::{TimerHandle, now_nanos, wheel},
};

pub struct Keeper<M> {
    params: Arc<KeepaliveParams<M>>,
    self_ref: Weak<Keeper<M>>,
    ch: Weak<Channel<M>>,
    // wheel callbacks run on the wheel's thread; async work hops back onto
    // the runtime the keeper was created on
    runtime: tokio::runtime::Handle,
    done: Mutex<bool>,
    last_ping: AtomicI64,
    last_pong: AtomicI64,
    timers: Mutex<Vec<TimerHandle>>,
}

impl<M: Clone + Send + Sync + 'static> Keeper<M> {
    pub(crate) fn new(params: Arc<KeepaliveParams<M>>, ch: &Arc<Channel<M>>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            params,
            self_ref: weak.clone(),
            ch: Arc::downgrade(ch),
            runtime: tokio::runtime::Handle::current(),
            done: Mutex::new(false),
            last_ping: AtomicI64::new(0),
            last_pong: AtomicI64::new(0),
            timers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn params(&self) -> &KeepaliveParams<M> {
        &self.params
    }

    /// Starts every configured arm. Called once, right after the channel is
    /// registered.
    pub(crate) fn run(&self, side: Side) {
        if side == Side::Server {
            if let Some(max_idle) = self.params.max_channel_idle_time {
                self.schedule_idle(max_idle);
            }
            if let Some(max_age) = self.params.max_channel_age {
                let Some(keeper) = self.self_ref.upgrade() else { return };
                self.remember(wheel().after_func(max_age, move || {
                    let runtime = keeper.runtime.clone();
                    runtime.spawn(async move {
                        if keeper.is_done() {
                            return;
                        }
                        debug!("closing channel due to maximum channel age");
                        keeper.go_away(Error::MaxAge).await;
                    });
                }));
            }
        }
        if let Some(health) = &self.params.health {
            self.schedule_health(health.time);
        }
    }

    /// Retires the keeper and cancels all outstanding timers. Invoked from
    /// the channel-close path.
    pub(crate) fn close(&self) {
        if let Ok(mut done) = self.done.lock() {
            *done = true;
        }
        if let Ok(mut timers) = self.timers.lock() {
            for timer in timers.drain(..) {
                timer.cancel();
            }
        }
        debug!("keeper retired");
    }

    /// Records read-side proof of life for the ping/pong arm.
    pub(crate) fn stamp_pong(&self) {
        self.last_pong.store(now_nanos(), Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.done.lock().map(|done| *done).unwrap_or(true)
    }

    fn remember(&self, handle: TimerHandle) {
        if let Ok(mut timers) = self.timers.lock() {
            // opportunistically shed fired timers
            timers.retain(|t| !t.is_spent());
            timers.push(handle);
        }
    }

    fn schedule_idle(&self, delay: Duration) {
        let Some(keeper) = self.self_ref.upgrade() else { return };
        self.remember(wheel().after_func(delay, move || {
            let runtime = keeper.runtime.clone();
            runtime.spawn(async move { keeper.idle_tick().await });
        }));
    }

    async fn idle_tick(self: Arc<Self>) {
        if self.is_done() {
            return;
        }
        let Some(ch) = self.ch.upgrade() else { return };
        let Some(max_idle) = self.params.max_channel_idle_time else { return };

        match ch.idle_since() {
            // busy: check again a full interval later
            None => self.schedule_idle(max_idle),
            Some(idle_since) => {
                let idled = idle_since.elapsed();
                if idled >= max_idle {
                    debug!(channel = ch.id(), "closing channel due to maximum idle time");
                    self.go_away(Error::IdleTimeout).await;
                } else {
                    self.schedule_idle(max_idle - idled);
                }
            }
        }
    }

    fn schedule_health(&self, delay: Duration) {
        let Some(keeper) = self.self_ref.upgrade() else { return };
        self.remember(wheel().after_func(delay, move || {
            let runtime = keeper.runtime.clone();
            runtime.spawn(async move { keeper.health_tick().await });
        }));
    }

    async fn health_tick(self: Arc<Self>) {
        if self.is_done() {
            return;
        }
        let Some(ch) = self.ch.upgrade() else { return };
        let Some(health) = self.params.health.as_ref() else { return };

        let now = now_nanos();
        let since_read = now.saturating_sub(ch.last_read_nanos());
        let interval = health.time.as_nanos() as i64;

        if since_read < interval {
            self.schedule_health(Duration::from_nanos((interval - since_read) as u64));
            return;
        }
        if !ch.readable() {
            return;
        }

        let last_ping = self.last_ping.load(Ordering::Acquire);
        if last_ping > self.last_pong.load(Ordering::Acquire) {
            // a ping is outstanding
            let ping_elapsed = now.saturating_sub(last_ping);
            let timeout = health.timeout.as_nanos() as i64;
            if ping_elapsed >= timeout {
                debug!(channel = ch.id(), "closing channel due to ping timeout");
                self.hard_close(&ch, Error::PingTimeout).await;
            } else {
                self.schedule_health(Duration::from_nanos((timeout - ping_elapsed) as u64));
            }
            return;
        }

        if self.send_ping(&ch).await {
            self.last_ping.store(now_nanos(), Ordering::Release);
            self.schedule_health(health.timeout);
        } else {
            debug!(channel = ch.id(), "closing channel due to ping failed");
            self.hard_close(&ch, Error::PingFailed).await;
        }
    }

    async fn send_ping(&self, ch: &Arc<Channel<M>>) -> bool {
        let Some(health) = self.params.health.as_ref() else {
            return false;
        };
        // an incomplete ping/pong configuration can never observe a reply
        if health.pong.is_none()
            || health.ping_recognizer.is_none()
            || health.pong_recognizer.is_none()
        {
            return false;
        }
        let Some(ping) = health.ping.clone() else {
            return false;
        };
        ch.write_directly(ping).await.is_ok()
    }

    /// Asks the peer to close, falling back to a hard close when go-away is
    /// not configured. A forced close is scheduled after the grace period
    /// either way; it no-ops if the peer closed first.
    async fn go_away(self: Arc<Self>, reason: Error) {
        let Some(ch) = self.ch.upgrade() else { return };

        let go_away_msg = self
            .params
            .go_away
            .as_ref()
            .and_then(|params| params.go_away.clone());
        let configured = ch.side() == Side::Server && go_away_msg.is_some();
        if !configured {
            self.hard_close(&ch, reason).await;
            return;
        }

        if let Some(msg) = go_away_msg {
            if let Err(err) = ch.write_directly(msg).await {
                error!(channel = ch.id(), %err, "send channel goaway message failed");
            } else {
                info!(channel = ch.id(), %reason, "channel asked to close by go-away");
            }
        }

        let keeper = Arc::clone(&self);
        self.remember(wheel().after_func(self.params.close_grace, move || {
            let runtime = keeper.runtime.clone();
            runtime.spawn(async move {
                let Some(ch) = keeper.ch.upgrade() else { return };
                keeper.hard_close(&ch, reason).await;
            });
        }));
    }

    /// Single-winner forced close with the grace period as the outbound
    /// drain bound.
    async fn hard_close(&self, ch: &Arc<Channel<M>>, reason: Error) {
        {
            let Ok(mut done) = self.done.lock() else { return };
            if *done {
                return;
            }
            *done = true;
        }
        let _ = ch.close(Some(self.params.close_grace), reason).await;
    }
}

impl<M> std::fmt::Debug for Keeper<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("done", &self.done.lock().map(|d| *d).unwrap_or(true))
            .field("last_ping", &self.last_ping.load(Ordering::Relaxed))
            .field("last_pong", &self.last_pong.load(Ordering::Relaxed))
            .finish()
    }
}
