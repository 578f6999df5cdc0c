// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ping/pong liveness: a silent peer is pinged and eventually evicted; a
//! responsive peer stays up across multiple cycles.

use std::time::{Duration, Instant};

use anyhow::Result;
use framewire::{
    codec::{control::ControlCodec, packet::LengthPrefixedCodec, payload::TextCodec},
    error::Error,
    keepalive::KeepaliveParams,
    transport::TransportOptions,
};
use serial_test::serial;

use crate::integration_tests::common::{PING_FRAME, PONG_FRAME, RawPeer, spawn_server};

type ControlOptions = TransportOptions<LengthPrefixedCodec, ControlCodec<TextCodec>>;

fn health_options(time: Duration, timeout: Duration) -> ControlOptions {
    let mut params = KeepaliveParams::new();
    params.health = Some(KeepaliveParams::<
        framewire::codec::control::ControlMessage<String>,
    >::builtin_health(time, timeout));
    TransportOptions::new(LengthPrefixedCodec::new(), ControlCodec::new(TextCodec::new()))
        .with_keepalive(params)
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn silent_peer_is_pinged_then_evicted() -> Result<()> {
    // health.time clamps to its 1s floor; timeout 1s
    let server =
        spawn_server(health_options(Duration::from_secs(1), Duration::from_secs(1))).await?;

    let mut peer = RawPeer::connect(server.addr).await?;
    let connected_at = Instant::now();

    // after ~1s of silence the server probes
    peer.expect_raw_frame(PING_FRAME, Duration::from_secs(3)).await?;
    let pinged_after = connected_at.elapsed();
    assert!(pinged_after >= Duration::from_millis(900), "pinged too early: {pinged_after:?}");

    // no pong: the channel is closed about one timeout later
    peer.expect_eof(Duration::from_secs(3)).await?;
    let evicted_after = connected_at.elapsed();
    assert!(evicted_after >= Duration::from_millis(1800), "evicted too early: {evicted_after:?}");
    assert!(evicted_after <= Duration::from_secs(5), "evicted too late: {evicted_after:?}");

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn responsive_peer_survives_multiple_cycles() -> Result<()> {
    let server =
        spawn_server(health_options(Duration::from_secs(1), Duration::from_secs(1))).await?;

    let mut peer = RawPeer::connect(server.addr).await?;

    // answer two full ping cycles
    for _ in 0..2 {
        peer.expect_raw_frame(PING_FRAME, Duration::from_secs(3)).await?;
        peer.send_raw(PONG_FRAME).await?;
    }

    // still registered: the pongs counted as read activity
    assert_eq!(server.server.handler().channel_count(), 1);

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}
