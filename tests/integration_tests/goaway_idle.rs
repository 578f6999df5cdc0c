// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Idle timeout and the go-away handshake, observed from both sides.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use framewire::{
    client::Client,
    codec::{
        control::{ControlCodec, ControlMessage},
        packet::LengthPrefixedCodec,
        payload::TextCodec,
    },
    error::Error,
    keepalive::KeepaliveParams,
    middleware::on_channel_closed_fn,
    transport::TransportOptions,
};
use serial_test::serial;
use tokio::sync::mpsc;

use crate::integration_tests::common::{GO_AWAY_FRAME, RawPeer, spawn_server};

type ControlOptions = TransportOptions<LengthPrefixedCodec, ControlCodec<TextCodec>>;

fn idle_go_away_options(idle: Duration, grace: Duration) -> ControlOptions {
    let mut params = KeepaliveParams::new();
    params.max_channel_idle_time = Some(idle);
    params.close_grace = grace;
    params.go_away = Some(KeepaliveParams::<ControlMessage<String>>::builtin_go_away());
    TransportOptions::new(LengthPrefixedCodec::new(), ControlCodec::new(TextCodec::new()))
        .with_keepalive(params)
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn idle_server_channel_gets_go_away_then_forced_close() -> Result<()> {
    let server = spawn_server(idle_go_away_options(
        Duration::from_millis(300),
        Duration::from_millis(500),
    ))
    .await?;

    let mut peer = RawPeer::connect(server.addr).await?;

    // idle for max_channel_idle_time: the server asks us to leave
    peer.expect_raw_frame(GO_AWAY_FRAME, Duration::from_secs(3)).await?;

    // we ignore it; the forced close lands after close_grace
    peer.expect_eof(Duration::from_secs(3)).await?;

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn max_age_closes_channel_without_go_away() -> Result<()> {
    // no go-away configured: max age falls back to a hard close
    let mut params: framewire::keepalive::KeepaliveParams<ControlMessage<String>> =
        KeepaliveParams::new();
    params.max_channel_age = Some(Duration::from_millis(400));
    params.close_grace = Duration::from_millis(200);
    let server = spawn_server(
        TransportOptions::new(LengthPrefixedCodec::new(), ControlCodec::new(TextCodec::new()))
            .with_keepalive(params),
    )
    .await?;

    let mut peer = RawPeer::connect(server.addr).await?;
    let connected_at = std::time::Instant::now();

    // activity does not matter for max age
    peer.send_raw(b"\x00\x00\x00\x03old").await?;
    peer.expect_eof(Duration::from_secs(3)).await?;

    let lived = connected_at.elapsed();
    // jitter is +/-10%, so anything under 360ms would be a bug
    assert!(lived >= Duration::from_millis(300), "closed too early: {lived:?}");

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn client_recognizes_go_away_and_closes_gracefully() -> Result<()> {
    let server = spawn_server(idle_go_away_options(
        Duration::from_millis(300),
        Duration::from_millis(500),
    ))
    .await?;

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<Error>();
    let close_observer = on_channel_closed_fn(
        move |_ctx, _ch: Arc<framewire::channel::Channel<ControlMessage<String>>>, err| {
            let closed_tx = closed_tx.clone();
            async move {
                let _ = closed_tx.send(err);
            }
        },
    );

    let mut client_params = KeepaliveParams::new();
    client_params.go_away = Some(KeepaliveParams::<ControlMessage<String>>::builtin_go_away());
    let client = Client::new(
        TransportOptions::new(LengthPrefixedCodec::new(), ControlCodec::new(TextCodec::new()))
            .with_keepalive(client_params)
            .add_on_channel_closed(close_observer),
    );

    let ch = client.dial(server.addr).await?;
    assert!(ch.is_active());

    // the client sits idle; the server's go-away arrives and the client's
    // keepalive middleware turns it into a graceful close
    let reason = tokio::time::timeout(Duration::from_secs(3), closed_rx.recv())
        .await?
        .expect("close reason delivered");
    assert!(matches!(reason, Error::ReceivedGoAway), "unexpected reason: {reason}");

    server
        .server
        .shutdown(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    Ok(())
}
