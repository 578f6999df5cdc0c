// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The transport handler: channel registry, admission control, and the
//! decode/dispatch half of the read loop.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    channel::{Channel, PipelineFactory, Side},
    codec::{PacketCodec, PayloadCodec},
    context::Context,
    error::Error,
    executor::TaskPool,
    io::ChannelReader,
    keepalive::{Keeper, KeepaliveParams, keepalive_middleware},
    middleware::{Middleware, handler_fn, on_channel_closed_fn},
    transport::{conn::Conn, options::TransportOptions},
};

const SERVING: u32 = 0;
const CLOSED: u32 = 1;

struct Registered<M> {
    ch: Arc<Channel<M>>,
    keeper: Option<Arc<Keeper<M>>>,
}

struct TransInner<C, P: PayloadCodec> {
    state: AtomicU32,
    packet_codec: C,
    payload_codec: P,
    max_channels: u32,
    max_send_message_size: u32,
    max_receive_message_size: u32,
    channels: Arc<DashMap<u64, Registered<P::Message>>>,
    channel_count: AtomicI64,
    next_channel_id: AtomicU64,
    pipelines: PipelineFactory<P::Message>,
    dispatch: TaskPool,
    keepalive: Option<Arc<KeepaliveParams<P::Message>>>,
}

/// Owns the set of active channels and drives decode-then-dispatch for
/// every connection the binding feeds it. Cheap to clone.
pub struct TransHandler<C, P: PayloadCodec> {
    inner: Arc<TransInner<C, P>>,
}

impl<C, P: PayloadCodec> Clone for TransHandler<C, P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C, P> TransHandler<C, P>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    pub fn new(options: TransportOptions<C, P>) -> Self {
        let channels: Arc<DashMap<u64, Registered<P::Message>>> = Arc::new(DashMap::new());
        let keepalive = options.keepalive.map(|kp| Arc::new(kp.consummate()));

        let inner = Arc::new_cyclic(|weak: &Weak<TransInner<C, P>>| {
            // terminal outbound handler: encode one frame and flush it
            let outbound_handler = {
                let weak = weak.clone();
                handler_fn(move |_ctx, ch: Arc<Channel<P::Message>>, msg: P::Message| {
                    let weak = weak.clone();
                    async move {
                        let Some(inner) = weak.upgrade() else {
                            return Err(Error::TransportClosed);
                        };
                        inner.write_frame(&ch, &msg).await
                    }
                })
            };

            // registry bookkeeping runs first among the closed hooks so
            // application hooks observe an already-deregistered channel
            let mut on_channel_closed = vec![{
                let weak = weak.clone();
                on_channel_closed_fn(move |_ctx, ch: Arc<Channel<P::Message>>, _err| {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.deregister(ch.id());
                        }
                    }
                })
            }];
            on_channel_closed.extend(options.on_channel_closed);

            // keepalive interception precedes every application middleware
            let mut inbound: Vec<Middleware<P::Message>> = Vec::new();
            if keepalive.is_some() {
                let registry = Arc::clone(&channels);
                inbound.push(keepalive_middleware(Arc::new(move |id: u64| {
                    registry.get(&id).and_then(|entry| entry.keeper.clone())
                })));
            }
            inbound.extend(options.inbound);

            TransInner {
                state: AtomicU32::new(SERVING),
                packet_codec: options.packet_codec,
                payload_codec: options.payload_codec,
                max_channels: options.max_channels,
                max_send_message_size: options.max_send_message_size,
                max_receive_message_size: options.max_receive_message_size,
                channels: Arc::clone(&channels),
                channel_count: AtomicI64::new(0),
                next_channel_id: AtomicU64::new(1),
                pipelines: PipelineFactory::new(
                    options.on_channel,
                    on_channel_closed,
                    inbound,
                    options.outbound,
                    options.router,
                    outbound_handler,
                ),
                dispatch: TaskPool::new(options.pool_capacity, options.spillover),
                keepalive,
            }
        });

        info!(
            max_channels = inner.max_channels,
            max_send_message_size = inner.max_send_message_size,
            max_receive_message_size = inner.max_receive_message_size,
            packet_codec = inner.packet_codec.name(),
            payload_codec = inner.payload_codec.name(),
            "transport handler ready"
        );
        Self { inner }
    }

    pub fn is_serving(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == SERVING
    }

    pub fn channel_count(&self) -> i64 {
        self.inner.channel_count.load(Ordering::Acquire)
    }

    /// Admits a new connection: builds and activates a channel, registers
    /// it, and starts its keeper. Activation hooks run behind a panic
    /// boundary; any failure closes the half-initialized channel.
    pub async fn on_connect(
        &self,
        ctx: Context,
        conn: Arc<Conn>,
        side: Side,
    ) -> Result<Arc<Channel<P::Message>>, Error> {
        let inner = &self.inner;
        if !self.is_serving() {
            return Err(Error::TransportClosed);
        }
        let count = inner.channel_count.load(Ordering::Acquire);
        if inner.max_channels > 0 && count >= inner.max_channels as i64 {
            info!(count, "new connect request was refused");
            return Err(Error::ConnectionRefused);
        }

        let id = inner.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let ch = Channel::new(id, conn, side, inner.pipelines.acquire());

        let activation = tokio::spawn({
            let ch = Arc::clone(&ch);
            async move { ch.activate(ctx).await }
        });
        let activated = match activation.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(Error::Panic(format!("panic on channel: {join_err}")))
            }
            Err(join_err) => Err(Error::Panic(join_err.to_string())),
        };
        if let Err(err) = activated {
            debug!(channel = id, %err, "connect request failed");
            let _ = ch.close(None, err.clone()).await;
            return Err(err);
        }

        let keeper = inner
            .keepalive
            .as_ref()
            .map(|params| Keeper::new(Arc::clone(params), &ch));
        inner.channels.insert(
            id,
            Registered { ch: Arc::clone(&ch), keeper: keeper.clone() },
        );
        inner.channel_count.fetch_add(1, Ordering::AcqRel);
        if let Some(keeper) = keeper {
            keeper.run(side);
        }
        Ok(ch)
    }

    /// Decodes one frame and dispatches its pipeline run onto the worker
    /// pool. Returns an error only when the read loop must stop; per-frame
    /// failures that keep the stream aligned are swallowed here.
    pub async fn on_message(
        &self,
        ch: &Arc<Channel<P::Message>>,
        reader: &mut ChannelReader,
    ) -> Result<(), Error> {
        let inner = &self.inner;
        if !self.is_serving() {
            return Err(Error::TransportClosed);
        }

        let mut frame = reader.begin_frame();
        // a decode failure means framing is lost (or the peer is gone),
        // which is fatal to the channel
        let msg = inner
            .packet_codec
            .decode(frame.inner(), &inner.payload_codec)
            .await?;
        let frame_len = frame.frame_len();
        drop(frame);

        if inner.max_receive_message_size > 0
            && frame_len > inner.max_receive_message_size as usize
        {
            error!(
                channel = ch.id(),
                size = frame_len,
                max = inner.max_receive_message_size,
                "message size greater than max-receive-message-size, dropped"
            );
            return Ok(());
        }

        let pipeline_run = {
            let ch = Arc::clone(ch);
            async move {
                if let Err(err) = ch.trigger_inbound(msg).await {
                    error!(channel = ch.id(), remote = ?ch.remote_addr(), %err, "inbound pipeline error");
                }
            }
        };
        let dispatched = inner.dispatch.submit(pipeline_run).await;

        // a panic inside the pipeline closes the channel with the captured
        // payload as the reason
        let watchdog_ch = Arc::clone(ch);
        tokio::spawn(async move {
            if let Err(join_err) = dispatched.await {
                if join_err.is_panic() {
                    let _ = watchdog_ch.begin_close(None, Error::Panic(join_err.to_string()));
                }
            }
        });
        Ok(())
    }

    /// Surfaces a connection teardown to the channel. Idempotent with any
    /// close that already happened.
    pub async fn on_conn_closed(&self, ch: &Arc<Channel<P::Message>>, err: Error) {
        let _ = ch.close(None, err).await;
    }

    /// Terminal write: encode `msg` as one frame under the connection's
    /// writer lock and flush it.
    pub(crate) async fn write_frame(
        &self,
        ch: &Arc<Channel<P::Message>>,
        msg: &P::Message,
    ) -> Result<(), Error> {
        self.inner.write_frame(ch, msg).await
    }

    /// Stops serving and concurrently closes every registered channel,
    /// waiting at most `bound`.
    pub async fn close(&self, bound: Option<Duration>, err: Error) -> Result<(), Error> {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(SERVING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let channels: Vec<Arc<Channel<P::Message>>> = inner
            .channels
            .iter()
            .map(|entry| Arc::clone(&entry.ch))
            .collect();
        let mut teardowns = Vec::with_capacity(channels.len());
        for ch in channels {
            let reason = err.clone();
            teardowns.push(tokio::spawn(async move {
                let _ = ch.close(bound, reason).await;
            }));
        }

        let drain = async {
            for teardown in teardowns {
                let _ = teardown.await;
            }
        };
        match bound {
            Some(bound) => {
                if timeout(bound, drain).await.is_err() {
                    warn!(pending = self.channel_count(), "transport close timed out");
                    return Err(Error::DrainTimeout {
                        pending: self.channel_count().max(0) as usize,
                    });
                }
            }
            None => drain.await,
        }
        Ok(())
    }
}

impl<C, P> TransInner<C, P>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    async fn write_frame(
        &self,
        ch: &Arc<Channel<P::Message>>,
        msg: &P::Message,
    ) -> Result<(), Error> {
        if self.state.load(Ordering::Acquire) != SERVING {
            return Err(Error::TransportClosed);
        }
        let mut writer = ch.conn().writer().await;
        let mut frame = writer.begin_frame(self.max_send_message_size as usize);
        self.packet_codec
            .encode(msg, &mut frame, &self.payload_codec)
            .await
    }

    fn deregister(&self, id: u64) {
        let Some((_, registered)) = self.channels.remove(&id) else {
            return;
        };
        if let Some(keeper) = registered.keeper {
            keeper.close();
        }
        self.channel_count.fetch_sub(1, Ordering::AcqRel);
    }
}
