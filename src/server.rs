// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Embedder-facing server.

use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    codec::{PacketCodec, PayloadCodec},
    error::Error,
    middleware::BoxFuture,
    transport::{TcpTransport, TransHandler, TransportOptions},
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8888";

/// Runs after the transport handler closed, before `shutdown` returns.
pub type ShutdownHook = Arc<dyn Fn(Error) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds a [`ShutdownHook`] from an async closure.
pub fn shutdown_hook_fn<F, Fut>(f: F) -> ShutdownHook
where
    F: Fn(Error) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |err| Box::pin(f(err)))
}

/// A listening endpoint bound to one transport handler.
pub struct Server<C, P: PayloadCodec> {
    addr: String,
    handler: TransHandler<C, P>,
    cancel: CancellationToken,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl<C, P> Server<C, P>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    /// `addr` may omit the host (`":9000"`), the port (`"0.0.0.0"`), or
    /// both (`""`); missing parts fall back to `127.0.0.1:8888`.
    pub fn new(addr: impl Into<String>, options: TransportOptions<C, P>) -> Self {
        Self {
            addr: addr.into(),
            handler: TransHandler::new(options),
            cancel: CancellationToken::new(),
            shutdown_hooks: Vec::new(),
        }
    }

    pub fn add_shutdown_hook(&mut self, hook: ShutdownHook) {
        self.shutdown_hooks.push(hook);
    }

    pub fn handler(&self) -> &TransHandler<C, P> {
        &self.handler
    }

    /// Binds the listener and serves until [`Server::shutdown`].
    pub async fn run(&self) -> Result<(), Error> {
        let addr = parse_addr(&self.addr);
        let listener = TcpListener::bind(&addr).await.map_err(Error::read_io)?;
        info!(%addr, "listening");
        self.serve(listener).await
    }

    /// Serves on an already-bound listener. Useful when the caller needs
    /// the ephemeral port before accepting starts.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        TcpTransport::serve(listener, self.handler.clone(), self.cancel.clone()).await
    }

    /// Stops accepting, closes every channel (bounded by `bound`), then
    /// runs the shutdown hooks.
    pub async fn shutdown(&self, bound: Option<Duration>, err: Error) -> Result<(), Error> {
        self.cancel.cancel();
        let result = self.handler.close(bound, err.clone()).await;
        for hook in &self.shutdown_hooks {
            hook(err.clone()).await;
        }
        result
    }
}

/// Fills missing host or port from the defaults, Go `net.SplitHostPort`
/// style for `host:port` inputs.
fn parse_addr(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            let port = if port.is_empty() { DEFAULT_PORT } else { port };
            format!("{host}:{port}")
        }
        None if addr.is_empty() => format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
        None => format!("{addr}:{DEFAULT_PORT}"),
    }
}
