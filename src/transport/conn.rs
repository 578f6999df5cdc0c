// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport-wrapped connection.
//!
//! A [`Conn`] owns the write half of a byte-stream connection behind an
//! async mutex: concurrent `Channel::write` calls are legal and the mutex
//! is what keeps their frames from interleaving. The read half is handed to
//! the per-connection read driver as a [`ChannelReader`] and never shared.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{Mutex, MutexGuard},
};
use tokio_util::sync::CancellationToken;

use crate::io::{ChannelReader, ConnWriter};

pub struct Conn {
    writer: Mutex<ConnWriter>,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Conn {
    /// Wraps a TCP stream, splitting it into the shared write side and the
    /// read driver's reader.
    pub fn wrap_stream(stream: TcpStream) -> std::io::Result<(std::sync::Arc<Self>, ChannelReader)> {
        stream.set_nodelay(true)?;
        let local = stream.local_addr().ok();
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Ok(Self::wrap_io(read_half, write_half, local, peer))
    }

    /// Wraps arbitrary byte-stream halves; in-memory duplex pipes in tests
    /// use this the same way the TCP binding does.
    pub fn wrap_io(
        read: impl AsyncRead + Send + Unpin + 'static,
        write: impl AsyncWrite + Send + Unpin + 'static,
        local: Option<SocketAddr>,
        peer: Option<SocketAddr>,
    ) -> (std::sync::Arc<Self>, ChannelReader) {
        let conn = std::sync::Arc::new(Self {
            writer: Mutex::new(ConnWriter::new(write)),
            local,
            peer,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        (conn, ChannelReader::new(read))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Exclusive access to the staged writer. Held for the duration of one
    /// frame's encode-and-flush.
    pub async fn writer(&self) -> MutexGuard<'_, ConnWriter> {
        self.writer.lock().await
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Fires when the connection is being torn down; the read driver
    /// selects on this to abandon a blocked read.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tears the connection down: wakes the read driver and sends a
    /// write-side FIN. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        // best effort: the peer may already be gone
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("active", &self.is_active())
            .finish()
    }
}
