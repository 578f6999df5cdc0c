// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server shutdown: channels drain, the accept loop stops, shutdown hooks
//! run after the transport closes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use framewire::{
    error::Error,
    server::{Server, shutdown_hook_fn},
    transport::TransportOptions,
};
use tokio::net::TcpListener;

use crate::integration_tests::common::{RawPeer, echo_router, eventually};

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_channels_and_runs_hooks() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let hook_ran = Arc::new(AtomicBool::new(false));
    let mut server = Server::new(
        addr.to_string(),
        TransportOptions::default().with_router(echo_router()),
    );
    {
        let hook_ran = Arc::clone(&hook_ran);
        server.add_shutdown_hook(shutdown_hook_fn(move |_err| {
            let hook_ran = Arc::clone(&hook_ran);
            async move {
                hook_ran.store(true, Ordering::SeqCst);
            }
        }));
    }
    let server = Arc::new(server);
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
    }

    let mut peer = RawPeer::connect(addr).await?;
    peer.send_text("alive?").await?;
    assert_eq!(peer.read_frame(Duration::from_secs(2)).await?, b"alive?");
    assert_eq!(server.handler().channel_count(), 1);

    server
        .shutdown(Some(Duration::from_secs(2)), Error::TransportClosed)
        .await?;
    assert!(hook_ran.load(Ordering::SeqCst), "shutdown hook did not run");

    // the connected peer is closed out and deregistered
    peer.expect_eof(Duration::from_secs(2)).await?;
    eventually(Duration::from_secs(2), || {
        server.handler().channel_count() == 0
    })
    .await?;

    // the transport refuses everything after shutdown: even if a connect
    // lands before the listener is dropped, no echo ever comes back
    if let Ok(mut late) = RawPeer::connect(addr).await {
        let _ = late.send_text("anyone?").await;
        assert!(late.read_frame(Duration::from_millis(500)).await.is_err());
    }
    Ok(())
}
