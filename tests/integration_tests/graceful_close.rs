// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Close ordering: `OnChannelClosed` must observe a quiesced inbound
//! pipeline even when the peer vanishes mid-handling.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use framewire::{
    channel::Channel,
    error::Error,
    middleware::{handler_fn, on_channel_closed_fn},
    router::router_fn,
    transport::TransportOptions,
};
use tokio::sync::mpsc;

use crate::integration_tests::common::{RawPeer, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn close_hook_sees_no_inbound_in_flight() -> Result<()> {
    let handler_finished = Arc::new(AtomicBool::new(false));
    let (verdict_tx, mut verdict_rx) = mpsc::unbounded_channel::<bool>();

    let slow_router = {
        let handler_finished = Arc::clone(&handler_finished);
        router_fn(move |_ctx, _ch, _msg: &String| {
            let handler_finished = Arc::clone(&handler_finished);
            Ok(handler_fn(move |_ctx, _ch: Arc<Channel<String>>, _msg: String| {
                let handler_finished = Arc::clone(&handler_finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    handler_finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }))
        })
    };

    let close_hook = {
        let handler_finished = Arc::clone(&handler_finished);
        on_channel_closed_fn(move |_ctx, _ch: Arc<Channel<String>>, _err| {
            let handler_finished = Arc::clone(&handler_finished);
            let verdict_tx = verdict_tx.clone();
            async move {
                // the close path drained inbound tasks first, so the slow
                // handler must have completed by now
                let _ = verdict_tx.send(handler_finished.load(Ordering::SeqCst));
            }
        })
    };

    let server = spawn_server(
        TransportOptions::default()
            .with_router(slow_router)
            .add_on_channel_closed(close_hook),
    )
    .await?;

    let mut peer = RawPeer::connect(server.addr).await?;
    peer.send_text("take your time").await?;
    // give the frame a moment to reach the pipeline, then vanish
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(peer);

    let verdict = tokio::time::timeout(Duration::from_secs(3), verdict_rx.recv())
        .await?
        .expect("close hook ran");
    assert!(verdict, "OnChannelClosed ran while an inbound task was in flight");

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}
