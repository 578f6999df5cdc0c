// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Minimal embedding: a length-prefixed text echo server with the built-in
//! keepalive stack.
//!
//! ```text
//! echo_server [config.yaml]
//! ```
//!
//! Speak to it with anything that frames text as a 4-byte big-endian
//! length prefix; idle clients are asked to go away, silent ones are
//! pinged and eventually evicted.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use framewire::{
    cfg::{ServerConfig, init_default_logger},
    channel::Channel,
    codec::{
        control::{ControlCodec, ControlMessage},
        packet::LengthPrefixedCodec,
        payload::TextCodec,
    },
    error::Error,
    keepalive::KeepaliveParams,
    middleware::handler_fn,
    router::router_fn,
    server::Server,
    transport::TransportOptions,
};
use tracing::info;

type Msg = ControlMessage<String>;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_default_logger()?;

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load_from_file(path)?,
        None => ServerConfig::default(),
    };

    let echo = router_fn(|_ctx, _ch, _msg: &Msg| {
        Ok(handler_fn(|_ctx, ch: Arc<Channel<Msg>>, msg: Msg| async move {
            match msg {
                ControlMessage::App(text) => ch.write(ControlMessage::App(text)).await,
                // control traffic never reaches the router; ignore it if a
                // peer sends unrecognized framed messages anyway
                ControlMessage::Control(_) => Ok(()),
            }
        }))
    });

    let mut keepalive: KeepaliveParams<Msg> = KeepaliveParams::new();
    keepalive.max_channel_idle_time = Some(Duration::from_secs(300));
    keepalive.health = Some(KeepaliveParams::<Msg>::builtin_health(
        Duration::from_secs(30),
        Duration::from_secs(10),
    ));
    keepalive.go_away = Some(KeepaliveParams::<Msg>::builtin_go_away());

    let options = config.apply(
        TransportOptions::new(LengthPrefixedCodec::new(), ControlCodec::new(TextCodec::new()))
            .with_router(echo)
            .with_keepalive(keepalive),
    );

    let server = Server::new(config.listen_addr(), options);
    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            server
                .shutdown(Some(Duration::from_secs(5)), Error::TransportClosed)
                .await?;
        }
    }
    Ok(())
}
