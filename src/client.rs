// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Embedder-facing client: the dialing side of the transport.

use std::{sync::Arc, time::Duration};

use tokio::net::ToSocketAddrs;

use crate::{
    channel::Channel,
    codec::{PacketCodec, PayloadCodec},
    error::Error,
    transport::{TcpTransport, TransHandler, TransportOptions},
};

/// Dials peers and hands back activated client-side channels. All channels
/// dialed through one client share its transport handler, middleware
/// chains, limits and keepalive configuration.
pub struct Client<C, P: PayloadCodec> {
    handler: TransHandler<C, P>,
}

impl<C, P> Client<C, P>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    pub fn new(options: TransportOptions<C, P>) -> Self {
        Self { handler: TransHandler::new(options) }
    }

    pub fn handler(&self) -> &TransHandler<C, P> {
        &self.handler
    }

    /// Connects, activates a channel over the new connection, and starts
    /// its read driver. Client channels ignore server-side keepalive arms
    /// (idle timeout, max age) but honor health pings and go-away.
    pub async fn dial(&self, addr: impl ToSocketAddrs) -> Result<Arc<Channel<P::Message>>, Error> {
        TcpTransport::dial(addr, &self.handler).await
    }

    /// Closes every channel dialed through this client.
    pub async fn shutdown(&self, bound: Option<Duration>, err: Error) -> Result<(), Error> {
        self.handler.close(bound, err).await
    }
}
