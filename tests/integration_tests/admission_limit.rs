// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Admission control: the socket accepts, the transport refuses.

use std::time::Duration;

use anyhow::Result;
use framewire::{error::Error, transport::TransportOptions};

use crate::integration_tests::common::{RawPeer, echo_router, eventually, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn over_limit_connection_is_closed_immediately() -> Result<()> {
    let server = spawn_server(
        TransportOptions::default()
            .with_router(echo_router())
            .max_channels(1),
    )
    .await?;

    let mut first = RawPeer::connect(server.addr).await?;
    first.send_raw(b"\x00\x00\x00\x02hi").await?;
    assert_eq!(first.read_frame(Duration::from_secs(2)).await?, b"hi");
    assert_eq!(server.server.handler().channel_count(), 1);

    // accepted at the socket layer, then refused and closed
    let mut second = RawPeer::connect(server.addr).await?;
    second.expect_eof(Duration::from_secs(2)).await?;
    assert_eq!(server.server.handler().channel_count(), 1);

    // the first channel is unaffected
    first.send_raw(b"\x00\x00\x00\x05still").await?;
    assert_eq!(first.read_frame(Duration::from_secs(2)).await?, b"still");

    // once the first peer leaves, a slot frees up
    drop(first);
    eventually(Duration::from_secs(2), || {
        server.server.handler().channel_count() == 0
    })
    .await?;

    let mut third = RawPeer::connect(server.addr).await?;
    third.send_raw(b"\x00\x00\x00\x04back").await?;
    assert_eq!(third.read_frame(Duration::from_secs(2)).await?, b"back");

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}
