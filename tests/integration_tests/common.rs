// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared plumbing for the end-to-end tests: ephemeral-port servers, a raw
//! TCP peer speaking the length-prefixed wire format by hand, and the
//! control-frame byte fixtures.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context as _, Result, bail};
use framewire::{
    channel::Channel,
    codec::{PacketCodec, PayloadCodec},
    middleware::handler_fn,
    router::{Router, router_fn},
    server::Server,
    transport::TransportOptions,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

/// Wire bytes of the built-in control frames, length prefix included.
pub const PING_FRAME: &[u8] = &[
    0x00, 0x00, 0x00, 0x0a, 0x04, 0x92, 0x53, 0x0f, 0x00, 0x01, b'P', b'i', b'n', b'g',
];
pub const PONG_FRAME: &[u8] = &[
    0x00, 0x00, 0x00, 0x0a, 0x04, 0x92, 0x53, 0x0f, 0x00, 0x02, b'P', b'o', b'n', b'g',
];
pub const GO_AWAY_FRAME: &[u8] = &[
    0x00, 0x00, 0x00, 0x0d, 0x04, 0x92, 0x53, 0x0f, 0x00, 0x03, b'G', b'o', b' ', b'A', b'w',
    b'a', b'y',
];

pub struct TestServer<C, P: PayloadCodec> {
    pub server: Arc<Server<C, P>>,
    pub addr: SocketAddr,
}

/// Binds an ephemeral port and serves `options` on it in the background.
pub async fn spawn_server<C, P>(options: TransportOptions<C, P>) -> Result<TestServer<C, P>>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = Arc::new(Server::new(addr.to_string(), options));

    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.serve(listener).await;
    });
    Ok(TestServer { server, addr })
}

/// An echo router: every inbound message is written straight back.
pub fn echo_router() -> Router<String> {
    router_fn(|_ctx, _ch, _msg: &String| {
        Ok(handler_fn(|_ctx, ch: Arc<Channel<String>>, msg: String| async move {
            ch.write(msg).await
        }))
    })
}

/// A raw TCP peer that frames messages by hand; lets tests assert exact
/// wire bytes without going through the framework's own codecs.
pub struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, body: &str) -> Result<()> {
        let mut framed = (body.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(body.as_bytes());
        self.send_raw(&framed).await
    }

    /// Reads exactly one length-prefixed frame (prefix stripped).
    pub async fn read_frame(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        timeout(deadline, async {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await?;
            let len = u32::from_be_bytes(header) as usize;
            let mut body = vec![0u8; len];
            self.stream.read_exact(&mut body).await?;
            Ok(body)
        })
        .await
        .context("timed out waiting for a frame")?
    }

    /// Reads one frame and returns it with the length prefix still on.
    pub async fn read_raw_frame(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        let body = self.read_frame(deadline).await?;
        let mut framed = (body.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Reads one raw frame and asserts its exact wire bytes, dumping both
    /// sides as hex on mismatch.
    pub async fn expect_raw_frame(&mut self, expected: &[u8], deadline: Duration) -> Result<()> {
        let frame = self.read_raw_frame(deadline).await?;
        if frame != expected {
            bail!(
                "frame mismatch: got {}, want {}",
                hex::encode(&frame),
                hex::encode(expected)
            );
        }
        Ok(())
    }

    /// Waits for the peer to close the connection.
    pub async fn expect_eof(&mut self, deadline: Duration) -> Result<()> {
        timeout(deadline, async {
            let mut scratch = [0u8; 64];
            loop {
                let n = self.stream.read(&mut scratch).await?;
                if n == 0 {
                    return Ok(());
                }
                // drain any frames still in flight
            }
        })
        .await
        .context("timed out waiting for EOF")?
    }
}

/// Polls `probe` until it returns true or the deadline passes.
pub async fn eventually(deadline: Duration, probe: impl Fn() -> bool) -> Result<()> {
    let result = timeout(deadline, async {
        while !probe() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if result.is_err() {
        bail!("condition not reached within {deadline:?}");
    }
    Ok(())
}
