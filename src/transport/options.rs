// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport configuration.

use crate::{
    codec::{PacketCodec, PayloadCodec, packet::LengthPrefixedCodec, payload::TextCodec},
    executor::{DEFAULT_POOL_SIZE, Spillover},
    keepalive::KeepaliveParams,
    middleware::{Middleware, OnChannel, OnChannelClosed},
    router::Router,
};

/// Default cap on a single message in either direction: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Options for one transport handler. The packet and payload codecs are
/// chosen by type; everything else is builder-style.
pub struct TransportOptions<C, P: PayloadCodec> {
    pub(crate) max_channels: u32,
    pub(crate) max_send_message_size: u32,
    pub(crate) max_receive_message_size: u32,
    pub(crate) packet_codec: C,
    pub(crate) payload_codec: P,
    pub(crate) router: Option<Router<P::Message>>,
    pub(crate) on_channel: Vec<OnChannel<P::Message>>,
    pub(crate) on_channel_closed: Vec<OnChannelClosed<P::Message>>,
    pub(crate) inbound: Vec<Middleware<P::Message>>,
    pub(crate) outbound: Vec<Middleware<P::Message>>,
    pub(crate) keepalive: Option<KeepaliveParams<P::Message>>,
    pub(crate) pool_capacity: usize,
    pub(crate) spillover: Spillover,
}

impl Default for TransportOptions<LengthPrefixedCodec, TextCodec> {
    fn default() -> Self {
        Self::new(LengthPrefixedCodec::new(), TextCodec::new())
    }
}

impl<C: PacketCodec, P: PayloadCodec> TransportOptions<C, P> {
    pub fn new(packet_codec: C, payload_codec: P) -> Self {
        Self {
            max_channels: u32::MAX,
            max_send_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_receive_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            packet_codec,
            payload_codec,
            router: None,
            on_channel: Vec::new(),
            on_channel_closed: Vec::new(),
            inbound: Vec::new(),
            outbound: Vec::new(),
            keepalive: None,
            pool_capacity: DEFAULT_POOL_SIZE,
            spillover: Spillover::default(),
        }
    }

    /// Caps concurrently registered channels; further connects are refused.
    pub fn max_channels(mut self, size: u32) -> Self {
        self.max_channels = size;
        self
    }

    /// Hard limit on one outbound frame; staging past it fails the encode.
    pub fn max_send_message_size(mut self, size: u32) -> Self {
        self.max_send_message_size = size;
        self
    }

    /// Hard limit on one inbound frame; overlimit messages are dropped
    /// after decode.
    pub fn max_receive_message_size(mut self, size: u32) -> Self {
        self.max_receive_message_size = size;
        self
    }

    pub fn with_router(mut self, router: Router<P::Message>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn add_on_channel(mut self, hook: OnChannel<P::Message>) -> Self {
        self.on_channel.push(hook);
        self
    }

    pub fn add_on_channel_closed(mut self, hook: OnChannelClosed<P::Message>) -> Self {
        self.on_channel_closed.push(hook);
        self
    }

    pub fn add_inbound_middleware(mut self, mw: Middleware<P::Message>) -> Self {
        self.inbound.push(mw);
        self
    }

    pub fn add_outbound_middleware(mut self, mw: Middleware<P::Message>) -> Self {
        self.outbound.push(mw);
        self
    }

    pub fn with_keepalive(mut self, params: KeepaliveParams<P::Message>) -> Self {
        self.keepalive = Some(params);
        self
    }

    /// Sizes the inbound dispatch pool and picks what happens when it is
    /// full.
    pub fn dispatch_pool(mut self, capacity: usize, spillover: Spillover) -> Self {
        self.pool_capacity = capacity;
        self.spillover = spillover;
        self
    }
}
