// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport-handler behavior over in-memory connections: admission,
//! dispatch, receive-size limits and shutdown.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use framewire::{
    channel::{Channel, Side},
    codec::{packet::LengthPrefixedCodec, payload::TextCodec},
    context::Context,
    error::Error,
    io::ChannelReader,
    middleware::handler_fn,
    router::router_fn,
    transport::{Conn, TransHandler, TransportOptions},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::{sleep, timeout},
};

type TextHandler = TransHandler<LengthPrefixedCodec, TextCodec>;

#[derive(Debug)]
struct Wired {
    ch: Arc<Channel<String>>,
    reader: ChannelReader,
    far: DuplexStream,
}

async fn wire(handler: &TextHandler) -> Result<Wired> {
    let (near, far) = tokio::io::duplex(1 << 16);
    let (near_read, near_write) = tokio::io::split(near);
    let (conn, reader) = Conn::wrap_io(near_read, near_write, None, None);
    let ch = handler
        .on_connect(Context::new(), conn, Side::Server)
        .await?;
    Ok(Wired { ch, reader, far })
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut framed = (body.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(body);
    framed
}

async fn wait_for(counter: &AtomicUsize, expected: usize) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        while counter.load(Ordering::SeqCst) < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn write_emits_one_frame() -> Result<()> {
    let handler = TransHandler::new(TransportOptions::default());
    let mut wired = wire(&handler).await?;

    wired.ch.write("hi".to_string()).await?;

    let mut out = [0u8; 6];
    wired.far.read_exact(&mut out).await?;
    assert_eq!(&out, b"\x00\x00\x00\x02hi");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn admission_limit_refuses_second_channel() -> Result<()> {
    let handler = TransHandler::new(TransportOptions::default().max_channels(1));

    let _first = wire(&handler).await?;
    assert_eq!(handler.channel_count(), 1);

    let err = wire(&handler).await.expect_err("over the limit");
    let err = err.downcast::<Error>()?;
    assert!(matches!(err, Error::ConnectionRefused));
    assert_eq!(err.to_string(), "connection number out of limit");
    assert_eq!(handler.channel_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn inbound_routes_and_echoes() -> Result<()> {
    let seen = Arc::new(AtomicUsize::new(0));
    let echo = {
        let seen = Arc::clone(&seen);
        router_fn(move |_ctx, _ch, _msg: &String| {
            let seen = Arc::clone(&seen);
            Ok(handler_fn(move |_ctx, ch: Arc<Channel<String>>, msg: String| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    ch.write(msg).await
                }
            }))
        })
    };

    let handler = TransHandler::new(TransportOptions::default().with_router(echo));
    let mut wired = wire(&handler).await?;

    wired.far.write_all(&frame(b"marco")).await?;
    handler.on_message(&wired.ch, &mut wired.reader).await?;
    wait_for(&seen, 1).await?;

    let mut out = [0u8; 9];
    wired.far.read_exact(&mut out).await?;
    assert_eq!(&out, b"\x00\x00\x00\x05marco");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_message_is_dropped_not_fatal() -> Result<()> {
    let seen = Arc::new(AtomicUsize::new(0));
    let counting = {
        let seen = Arc::clone(&seen);
        router_fn(move |_ctx, _ch, _msg: &String| {
            let seen = Arc::clone(&seen);
            Ok(handler_fn(move |_ctx, _ch: Arc<Channel<String>>, _msg: String| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
        })
    };

    let handler = TransHandler::new(
        TransportOptions::default()
            .with_router(counting)
            .max_receive_message_size(16),
    );
    let mut wired = wire(&handler).await?;

    // 60-byte frame: over the limit, decoded then dropped
    wired.far.write_all(&frame(&[b'x'; 60])).await?;
    handler.on_message(&wired.ch, &mut wired.reader).await?;

    // a frame within the limit still flows
    wired.far.write_all(&frame(b"small")).await?;
    handler.on_message(&wired.ch, &mut wired.reader).await?;

    wait_for(&seen, 1).await?;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(wired.ch.is_active(), "oversized frame must not kill the channel");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn decode_failure_ends_the_read_loop() -> Result<()> {
    let handler = TransHandler::new(TransportOptions::default());
    let mut wired = wire(&handler).await?;

    // half a header, then EOF
    wired.far.write_all(&[0x00, 0x00]).await?;
    wired.far.shutdown().await?;

    let err = handler
        .on_message(&wired.ch, &mut wired.reader)
        .await
        .expect_err("truncated frame");
    assert!(matches!(err, Error::Eof));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_handler_refuses_everything() -> Result<()> {
    let handler = TransHandler::new(TransportOptions::default());
    let wired = wire(&handler).await?;
    assert!(handler.is_serving());

    handler
        .close(Some(Duration::from_secs(1)), Error::TransportClosed)
        .await?;
    assert!(!handler.is_serving());
    assert!(!wired.ch.is_active());

    let err = wire(&handler).await.expect_err("transport closed");
    assert!(matches!(err.downcast::<Error>()?, Error::TransportClosed));

    let err = wired
        .ch
        .write("too late".to_string())
        .await
        .expect_err("writer closed");
    assert!(matches!(err, Error::WriterClosed));
    Ok(())
}
