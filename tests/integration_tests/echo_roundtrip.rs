// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed echo over real TCP, asserted at the byte level and
//! through a framework client.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use framewire::{
    channel::Channel,
    client::Client,
    error::Error,
    middleware::handler_fn,
    router::router_fn,
    transport::TransportOptions,
};
use tokio::sync::mpsc;

use crate::integration_tests::common::{RawPeer, echo_router, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn raw_bytes_echo_exactly() -> Result<()> {
    let server = spawn_server(TransportOptions::default().with_router(echo_router())).await?;

    let mut peer = RawPeer::connect(server.addr).await?;
    peer.send_raw(b"\x00\x00\x00\x05hello").await?;

    let reply = peer.read_raw_frame(Duration::from_secs(2)).await?;
    assert_eq!(reply, b"\x00\x00\x00\x05hello");

    server.server.shutdown(Some(Duration::from_secs(1)), Error::TransportClosed).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn framed_client_roundtrip() -> Result<()> {
    let server = spawn_server(TransportOptions::default().with_router(echo_router())).await?;

    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<String>();
    let capture = router_fn(move |_ctx, _ch, msg: &String| {
        let replies_tx = replies_tx.clone();
        let msg = msg.clone();
        Ok(handler_fn(move |_ctx, _ch: Arc<Channel<String>>, _msg: String| {
            let replies_tx = replies_tx.clone();
            let msg = msg.clone();
            async move {
                let _ = replies_tx.send(msg);
                Ok(())
            }
        }))
    });

    let client = Client::new(TransportOptions::default().with_router(capture));
    let ch = client.dial(server.addr).await?;

    ch.write("round and round".to_string()).await?;
    let reply = tokio::time::timeout(Duration::from_secs(2), replies_rx.recv())
        .await?
        .expect("reply channel open");
    assert_eq!(reply, "round and round");

    // several messages on one channel reuse the same pipeline; dispatch
    // runs on the worker pool, so completion order is not guaranteed
    for i in 0..5 {
        ch.write(format!("msg-{i}")).await?;
    }
    let mut replies = Vec::new();
    for _ in 0..5 {
        let reply = tokio::time::timeout(Duration::from_secs(2), replies_rx.recv())
            .await?
            .expect("reply channel open");
        replies.push(reply);
    }
    replies.sort();
    assert_eq!(replies, (0..5).map(|i| format!("msg-{i}")).collect::<Vec<_>>());

    client.shutdown(Some(Duration::from_secs(1)), Error::TransportClosed).await?;
    server.server.shutdown(Some(Duration::from_secs(1)), Error::TransportClosed).await?;
    Ok(())
}
