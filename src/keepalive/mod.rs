// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Channel keepalive: liveness parameters, the per-channel keeper state
//! machine, and the inbound middleware that intercepts keepalive traffic.

use std::{sync::Arc, time::Duration};

use rand::RngExt;
use tracing::warn;

use crate::{
    channel::{Channel, Side},
    codec::control::{ControlFrame, ControlMessage},
    error::Error,
    middleware::{Handler, Middleware},
};

pub mod keeper;

pub use keeper::Keeper;

/// Default grace period between a go-away (or close request) and the
/// forced close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Default wait for read activity after a ping before the channel is
/// declared unresponsive.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Lower bound on the health-check interval.
pub const MIN_HEALTH_TIME: Duration = Duration::from_secs(1);

/// Predicate recognizing a keepalive message on the inbound path.
pub type Recognizer<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

/// Ping/pong liveness probing.
#[derive(Clone)]
pub struct HealthParams<M> {
    /// After this long without read activity, ping the peer. Clamped to
    /// [`MIN_HEALTH_TIME`].
    pub time: Duration,
    /// After a ping, wait this long for read activity before closing the
    /// channel as unresponsive.
    pub timeout: Duration,
    pub ping: Option<M>,
    pub pong: Option<M>,
    pub ping_recognizer: Option<Recognizer<M>>,
    pub pong_recognizer: Option<Recognizer<M>>,
}

/// Graceful connection-draining handshake.
#[derive(Clone)]
pub struct GoAwayParams<M> {
    /// Message a server sends to ask the client to close.
    pub go_away: Option<M>,
    /// Client-side predicate recognizing the server's go-away.
    pub recognizer: Option<Recognizer<M>>,
}

/// Keepalive configuration. Every field is optional; zero or `None` means
/// the corresponding arm never runs.
#[derive(Clone)]
pub struct KeepaliveParams<M> {
    /// Server side: close channels idle for this long.
    pub max_channel_idle_time: Option<Duration>,
    /// Server side: close channels after this much wall time regardless of
    /// activity. A ±10% jitter is applied when the parameters are
    /// installed, spreading reconnection storms.
    pub max_channel_age: Option<Duration>,
    /// Upper bound between a go-away and the forced close.
    pub close_grace: Duration,
    pub health: Option<HealthParams<M>>,
    pub go_away: Option<GoAwayParams<M>>,
}

impl<M> Default for KeepaliveParams<M> {
    fn default() -> Self {
        Self {
            max_channel_idle_time: None,
            max_channel_age: None,
            close_grace: DEFAULT_CLOSE_GRACE,
            health: None,
            go_away: None,
        }
    }
}

impl<M> KeepaliveParams<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes the parameters: jitters the max age, clamps the health
    /// interval, defaults the health timeout, and warns about ping
    /// configurations that cannot complete a ping/pong cycle (those close
    /// silent channels forcibly instead).
    pub(crate) fn consummate(mut self) -> Self {
        if let Some(age) = self.max_channel_age {
            self.max_channel_age = Some(jitter(age));
        }
        if self.close_grace.is_zero() {
            self.close_grace = DEFAULT_CLOSE_GRACE;
        }
        if let Some(health) = self.health.as_mut() {
            if health.time.is_zero() {
                self.health = None;
            } else {
                if health.time < MIN_HEALTH_TIME {
                    health.time = MIN_HEALTH_TIME;
                }
                if health.timeout.is_zero() {
                    health.timeout = DEFAULT_HEALTH_TIMEOUT;
                }
                if health.ping.is_none() {
                    warn!(
                        "keepalive health interval set without a ping message; channels with no \
                         read activity will be closed forcibly"
                    );
                } else if health.pong.is_none()
                    || health.ping_recognizer.is_none()
                    || health.pong_recognizer.is_none()
                {
                    warn!(
                        "keepalive ping set without pong or recognizers; channels with no read \
                         activity will be closed forcibly"
                    );
                }
            }
        }
        self
    }
}

impl<A> KeepaliveParams<ControlMessage<A>> {
    /// Health parameters using the built-in framed ping/pong.
    pub fn builtin_health(time: Duration, timeout: Duration) -> HealthParams<ControlMessage<A>> {
        HealthParams {
            time,
            timeout,
            ping: Some(ControlMessage::Control(ControlFrame::ping())),
            pong: Some(ControlMessage::Control(ControlFrame::pong())),
            ping_recognizer: Some(Arc::new(|msg: &ControlMessage<A>| {
                msg.as_control().is_some_and(ControlFrame::is_ping)
            })),
            pong_recognizer: Some(Arc::new(|msg: &ControlMessage<A>| {
                msg.as_control().is_some_and(ControlFrame::is_pong)
            })),
        }
    }

    /// Go-away parameters using the built-in framed go-away.
    pub fn builtin_go_away() -> GoAwayParams<ControlMessage<A>> {
        GoAwayParams {
            go_away: Some(ControlMessage::Control(ControlFrame::go_away())),
            recognizer: Some(Arc::new(|msg: &ControlMessage<A>| {
                msg.as_control().is_some_and(ControlFrame::is_go_away)
            })),
        }
    }
}

// Generate a jitter of +/-10%, inspired by grpc-go's connection-storm
// dispersal.
fn jitter(value: Duration) -> Duration {
    let tenth = (value.as_nanos() / 10) as i64;
    if tenth == 0 {
        return value;
    }
    let offset = rand::rng().random_range(-tenth..tenth);
    if offset >= 0 {
        value + Duration::from_nanos(offset as u64)
    } else {
        value.saturating_sub(Duration::from_nanos(offset.unsigned_abs()))
    }
}

/// Inbound middleware intercepting keepalive traffic. Placed before every
/// application inbound middleware:
/// recognized pings are answered with the configured pong, recognized pongs
/// stamp the keeper, and a recognized go-away starts a graceful close on
/// client channels. None of these propagate further down the chain.
pub(crate) fn keepalive_middleware<M>(
    lookup: Arc<dyn Fn(u64) -> Option<Arc<Keeper<M>>> + Send + Sync>,
) -> Middleware<M>
where M: Clone + Send + Sync + 'static {
    Arc::new(move |next: Handler<M>| -> Handler<M> {
        let lookup = Arc::clone(&lookup);
        Arc::new(move |ctx,
                       ch: Arc<Channel<M>>,
                       msg: M|
                       -> crate::middleware::BoxFuture<'static, Result<(), Error>> {
            let Some(keeper) = lookup(ch.id()) else {
                return next(ctx, ch, msg);
            };
            let params = keeper.params();

            if let Some(health) = &params.health {
                if let (Some(recognize), Some(pong)) =
                    (&health.ping_recognizer, &health.pong)
                {
                    if recognize(&msg) {
                        let pong = pong.clone();
                        return Box::pin(async move { ch.write(pong).await });
                    }
                }
                if let Some(recognize) = &health.pong_recognizer {
                    if recognize(&msg) {
                        keeper.stamp_pong();
                        return Box::pin(std::future::ready(Ok(())));
                    }
                }
            }

            if ch.side() == Side::Client {
                if let Some(go_away) = &params.go_away {
                    if let Some(recognize) = &go_away.recognizer {
                        if recognize(&msg) {
                            // spawned: awaiting the inbound drain from an
                            // inbound task would deadlock
                            let _ = ch.begin_close(
                                Some(params.close_grace),
                                Error::ReceivedGoAway,
                            );
                            return Box::pin(std::future::ready(Ok(())));
                        }
                    }
                }
            }

            next(ctx, ch, msg)
        })
    })
}
