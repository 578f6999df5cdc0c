// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Handler and middleware types.
//!
//! A [`Handler`] is the unit of message processing; a [`Middleware`] wraps a
//! handler and yields a new one. Given middlewares `[m1, m2, m3]` and a
//! terminal handler `h`, [`chain`] composes `m1(m2(m3(h)))`, so the first
//! middleware in the list is the outermost at invocation time.
//!
//! Everything is reference-counted closures rather than generic towers of
//! types: pipelines mix process-wide chains with channel-private additions
//! at runtime, so the composition has to be dynamic.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{channel::Channel, context::Context, error::Error};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Processes one message on a channel.
pub type Handler<M> =
    Arc<dyn Fn(Context, Arc<Channel<M>>, M) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Wraps a handler, producing a new handler.
pub type Middleware<M> = Arc<dyn Fn(Handler<M>) -> Handler<M> + Send + Sync>;

/// Channel-activation hook. Runs before the channel becomes readable or
/// writeable; may replace the channel context or veto activation.
pub type OnChannel<M> =
    Arc<dyn Fn(Context, Arc<Channel<M>>) -> BoxFuture<'static, Result<Context, Error>> + Send + Sync>;

/// Channel-teardown hook. Receives the close reason; best-effort, runs
/// exactly once per channel.
pub type OnChannelClosed<M> =
    Arc<dyn Fn(Context, Arc<Channel<M>>, Error) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds a [`Handler`] from an async closure.
pub fn handler_fn<M, F, Fut>(f: F) -> Handler<M>
where
    M: Send + 'static,
    F: Fn(Context, Arc<Channel<M>>, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |ctx, ch, msg| -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(f(ctx, ch, msg))
    })
}

/// Builds a [`Middleware`] from a wrapping closure.
pub fn middleware_fn<M, F>(f: F) -> Middleware<M>
where F: Fn(Handler<M>) -> Handler<M> + Send + Sync + 'static {
    Arc::new(f)
}

/// Builds an [`OnChannel`] hook from an async closure.
pub fn on_channel_fn<M, F, Fut>(f: F) -> OnChannel<M>
where
    M: Send + 'static,
    F: Fn(Context, Arc<Channel<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, Error>> + Send + 'static,
{
    Arc::new(move |ctx, ch| -> BoxFuture<'static, Result<Context, Error>> {
        Box::pin(f(ctx, ch))
    })
}

/// Builds an [`OnChannelClosed`] hook from an async closure.
pub fn on_channel_closed_fn<M, F, Fut>(f: F) -> OnChannelClosed<M>
where
    M: Send + 'static,
    F: Fn(Context, Arc<Channel<M>>, Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, ch, err| -> BoxFuture<'static, ()> { Box::pin(f(ctx, ch, err)) })
}

/// The handler that does nothing; terminal of the inbound chain when no
/// router is installed.
pub fn noop_handler<M: Send + 'static>() -> Handler<M> {
    handler_fn(|_ctx, _ch, _msg| async { Ok(()) })
}

/// Composes `middlewares` around `terminal`, first-in-list outermost.
pub fn chain<M>(middlewares: &[Middleware<M>], terminal: Handler<M>) -> Handler<M> {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, mw| mw(next))
}
