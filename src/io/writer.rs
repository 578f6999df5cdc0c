// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Staged writer over a connection's write half.

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{error::Error, io::pool::WRITE_BUFFERS};

/// A back-patchable region reserved inside a writer's staging buffer.
///
/// Length-prefixed framing reserves its header before the body length is
/// known and patches it afterwards; the reservation stays valid until the
/// frame is flushed or abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    offset: usize,
    len: usize,
}

impl Reservation {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Synchronous staging surface consumed by payload codecs.
pub trait Writer {
    /// Appends `buf` to the staging buffer.
    fn write(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Reserves `n` zeroed bytes for later patching.
    fn reserve(&mut self, n: usize) -> Result<Reservation, Error>;

    /// Overwrites a reservation. `bytes` must match the reserved length.
    fn patch(&mut self, res: &Reservation, bytes: &[u8]) -> Result<(), Error>;

    /// Bytes staged in this writer's scope so far.
    fn written(&self) -> usize;
}

/// Buffered writer owning the connection's write half.
///
/// All staging is in-memory; only `flush` touches the socket. `flush` with
/// nothing staged is a no-op, which makes it idempotent at frame
/// boundaries.
pub struct ConnWriter {
    io: Box<dyn AsyncWrite + Send + Unpin>,
    buf: Vec<u8>,
}

impl ConnWriter {
    pub fn new(io: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self { io: Box::new(io), buf: WRITE_BUFFERS.acquire() }
    }

    /// Opens a per-frame scope bounded by `max_frame` staged bytes; see
    /// [`FrameWriter`].
    pub fn begin_frame(&mut self, max_frame: usize) -> FrameWriter<'_> {
        FrameWriter::new(self, max_frame)
    }

    pub fn staged(&self) -> usize {
        self.buf.len()
    }

    /// Submits everything staged to the socket.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let Self { io, buf } = self;
        io.write_all(buf).await.map_err(Error::write_io)?;
        io.flush().await.map_err(Error::write_io)?;
        buf.clear();
        Ok(())
    }

    /// Sends a write-side FIN. Irreversible.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.io.shutdown().await.map_err(Error::write_io)
    }

    fn truncate(&mut self, to: usize) {
        self.buf.truncate(to);
    }
}

impl Drop for ConnWriter {
    fn drop(&mut self) {
        WRITE_BUFFERS.release(std::mem::take(&mut self.buf));
    }
}

impl fmt::Debug for ConnWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnWriter")
            .field("staged", &self.buf.len())
            .finish()
    }
}

/// Scoped view over one outbound frame.
///
/// Enforces the send-size limit while the frame is staged and guarantees
/// the stream never carries a torn frame: if the scope is dropped without a
/// successful flush, everything it staged is discarded.
pub struct FrameWriter<'a> {
    conn: &'a mut ConnWriter,
    start: usize,
    max_frame: usize,
    flushed: bool,
}

impl<'a> FrameWriter<'a> {
    fn new(conn: &'a mut ConnWriter, max_frame: usize) -> Self {
        let start = conn.staged();
        let max_frame = if max_frame == 0 { usize::MAX } else { max_frame };
        Self { conn, start, max_frame, flushed: false }
    }

    /// Submits the frame. Called exactly once by every packet codec as the
    /// final step of `encode`.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.conn.flush().await?;
        self.flushed = true;
        Ok(())
    }

    fn charge(&self, add: usize) -> Result<(), Error> {
        if self.written() + add > self.max_frame {
            return Err(Error::FrameOversize);
        }
        Ok(())
    }

    /// Grants payload codecs direct mutable access to a reserved window,
    /// e.g. for fixed-length marshaling via a [`WindowWriter`].
    pub fn window_mut(&mut self, res: &Reservation) -> &mut [u8] {
        &mut self.conn.buf[res.offset..res.offset + res.len]
    }
}

impl Writer for FrameWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.charge(buf.len())?;
        self.conn.buf.extend_from_slice(buf);
        Ok(())
    }

    fn reserve(&mut self, n: usize) -> Result<Reservation, Error> {
        self.charge(n)?;
        let offset = self.conn.buf.len();
        self.conn.buf.resize(offset + n, 0);
        Ok(Reservation { offset, len: n })
    }

    fn patch(&mut self, res: &Reservation, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() != res.len {
            return Err(Error::ShortBuffer { remain: res.len, need: bytes.len() });
        }
        self.conn.buf[res.offset..res.offset + res.len].copy_from_slice(bytes);
        Ok(())
    }

    fn written(&self) -> usize {
        self.conn.staged() - self.start
    }
}

impl Drop for FrameWriter<'_> {
    fn drop(&mut self) {
        if !self.flushed {
            self.conn.truncate(self.start);
        }
    }
}

/// Fixed-capacity writer over a caller-supplied window. Staging past the
/// window is a hard error; fixed-length framing uses this to reject
/// payloads larger than the frame.
pub struct WindowWriter<'a> {
    buf: &'a mut [u8],
    write_idx: usize,
}

impl<'a> WindowWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, write_idx: 0 }
    }
}

impl Writer for WindowWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        let remain = self.buf.len() - self.write_idx;
        if remain < buf.len() {
            return Err(Error::ShortBuffer { remain, need: buf.len() });
        }
        self.buf[self.write_idx..self.write_idx + buf.len()].copy_from_slice(buf);
        self.write_idx += buf.len();
        Ok(())
    }

    fn reserve(&mut self, n: usize) -> Result<Reservation, Error> {
        let remain = self.buf.len() - self.write_idx;
        if remain < n {
            return Err(Error::ShortBuffer { remain, need: n });
        }
        let offset = self.write_idx;
        self.buf[offset..offset + n].fill(0);
        self.write_idx += n;
        Ok(Reservation { offset, len: n })
    }

    fn patch(&mut self, res: &Reservation, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() != res.len {
            return Err(Error::ShortBuffer { remain: res.len, need: bytes.len() });
        }
        self.buf[res.offset..res.offset + res.len].copy_from_slice(bytes);
        Ok(())
    }

    fn written(&self) -> usize {
        self.write_idx
    }
}
