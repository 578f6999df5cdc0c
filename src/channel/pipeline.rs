// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-channel pipeline: hook chains, middleware chains and the router.
//!
//! The process-wide chains are shared immutably by every pipeline the
//! factory hands out; the three channel-private lists are appended during
//! `OnChannel` execution and cleared when the pipeline is released back to
//! the factory's free-list on channel close.
//!
//! Chain ordering is asymmetric on purpose: channel-private inbound
//! middleware runs *innermost* (just before the router), while
//! channel-private outbound middleware runs *outermost* (first on write).

use std::sync::{Arc, Mutex, Weak};

use crate::{
    middleware::{Handler, Middleware, OnChannel, OnChannelClosed, chain, noop_handler},
    router::{Router, into_middleware},
};

struct PipelineShared<M> {
    on_channel: Arc<[OnChannel<M>]>,
    on_channel_closed: Arc<[OnChannelClosed<M>]>,
    inbound: Arc<[Middleware<M>]>,
    outbound: Arc<[Middleware<M>]>,
    router: Option<Router<M>>,
    outbound_handler: Handler<M>,
}

/// Hands out pooled pipelines pre-populated with the common chains.
pub struct PipelineFactory<M> {
    shared: Arc<PipelineShared<M>>,
    pool: Arc<Mutex<Vec<Pipeline<M>>>>,
}

impl<M: Send + 'static> PipelineFactory<M> {
    pub fn new(
        on_channel: Vec<OnChannel<M>>,
        on_channel_closed: Vec<OnChannelClosed<M>>,
        inbound: Vec<Middleware<M>>,
        outbound: Vec<Middleware<M>>,
        router: Option<Router<M>>,
        outbound_handler: Handler<M>,
    ) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                on_channel: on_channel.into(),
                on_channel_closed: on_channel_closed.into(),
                inbound: inbound.into(),
                outbound: outbound.into(),
                router,
                outbound_handler,
            }),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acquire(&self) -> Pipeline<M> {
        if let Ok(mut pooled) = self.pool.lock() {
            if let Some(pipeline) = pooled.pop() {
                return pipeline;
            }
        }
        Pipeline {
            shared: Arc::clone(&self.shared),
            pool: Arc::downgrade(&self.pool),
            ch_closed: Vec::new(),
            ch_inbound: Vec::new(),
            ch_outbound: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

pub struct Pipeline<M> {
    shared: Arc<PipelineShared<M>>,
    pool: Weak<Mutex<Vec<Pipeline<M>>>>,
    ch_closed: Vec<OnChannelClosed<M>>,
    ch_inbound: Vec<Middleware<M>>,
    ch_outbound: Vec<Middleware<M>>,
}

impl<M: Send + 'static> Pipeline<M> {
    pub(crate) fn add_on_channel_closed(&mut self, hook: OnChannelClosed<M>) {
        self.ch_closed.push(hook);
    }

    pub(crate) fn add_inbound(&mut self, mw: Middleware<M>) {
        self.ch_inbound.push(mw);
    }

    pub(crate) fn add_outbound(&mut self, mw: Middleware<M>) {
        self.ch_outbound.push(mw);
    }

    pub(crate) fn on_channel_chain(&self) -> Arc<[OnChannel<M>]> {
        Arc::clone(&self.shared.on_channel)
    }

    /// Common chain first, channel-private appended: registration order.
    pub(crate) fn on_channel_closed_chain(&self) -> Vec<OnChannelClosed<M>> {
        self.shared
            .on_channel_closed
            .iter()
            .chain(self.ch_closed.iter())
            .cloned()
            .collect()
    }

    /// `[common inbound] ++ [channel inbound] ++ [router]` around a no-op
    /// terminal.
    pub(crate) fn compose_inbound(&self) -> Handler<M> {
        let mut middlewares: Vec<Middleware<M>> = self
            .shared
            .inbound
            .iter()
            .chain(self.ch_inbound.iter())
            .cloned()
            .collect();
        if let Some(router) = &self.shared.router {
            middlewares.push(into_middleware(Arc::clone(router)));
        }
        chain(&middlewares, noop_handler())
    }

    /// `[channel outbound] ++ [common outbound]` around the terminal write
    /// handler.
    pub(crate) fn compose_outbound(&self) -> Handler<M> {
        let middlewares: Vec<Middleware<M>> = self
            .ch_outbound
            .iter()
            .chain(self.shared.outbound.iter())
            .cloned()
            .collect();
        chain(&middlewares, Arc::clone(&self.shared.outbound_handler))
    }

    /// Common outbound chain only; the keeper emits pings and go-aways
    /// through this so channel-private middleware cannot delay or mutate
    /// them.
    pub(crate) fn compose_outbound_direct(&self) -> Handler<M> {
        chain(&self.shared.outbound, Arc::clone(&self.shared.outbound_handler))
    }

    /// Clears the channel-private state and returns the pipeline to its
    /// factory's free-list.
    pub(crate) fn release(mut self) {
        self.ch_closed.clear();
        self.ch_inbound.clear();
        self.ch_outbound.clear();
        if let Some(pool) = self.pool.upgrade() {
            if let Ok(mut pooled) = pool.lock() {
                pooled.push(self);
            }
        }
    }
}
