// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Inbound message routing.
//!
//! A router inspects a decoded message and selects the terminal handler for
//! it. Selection is synchronous; the selected handler runs as the innermost
//! element of the inbound chain.

use std::sync::Arc;

use crate::{
    channel::Channel,
    context::Context,
    error::Error,
    middleware::{Handler, Middleware},
};

pub type Router<M> = Arc<
    dyn Fn(&Context, &Arc<Channel<M>>, &M) -> Result<Handler<M>, Error> + Send + Sync,
>;

/// Builds a [`Router`] from a selection closure.
pub fn router_fn<M, F>(f: F) -> Router<M>
where F: Fn(&Context, &Arc<Channel<M>>, &M) -> Result<Handler<M>, Error> + Send + Sync + 'static
{
    Arc::new(f)
}

/// Adapts a router into the innermost inbound middleware: it discards the
/// no-op terminal and invokes whatever handler the router selected.
pub fn into_middleware<M: Send + 'static>(router: Router<M>) -> Middleware<M> {
    Arc::new(move |_next: Handler<M>| -> Handler<M> {
        let router = Arc::clone(&router);
        Arc::new(
            move |ctx: Context,
                  ch: Arc<Channel<M>>,
                  msg: M|
                  -> crate::middleware::BoxFuture<'static, Result<(), Error>> {
                match router(&ctx, &ch, &msg) {
                    Ok(handler) => handler(ctx, ch, msg),
                    Err(err) => Box::pin(std::future::ready(Err(err))),
                }
            },
        )
    })
}
