// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Growable buffered reader over a connection's read half.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{error::Error, io::pool::READ_BUFFERS};

/// Synchronous byte-view consumed by payload codecs.
///
/// By the time a payload codec runs, the packet codec has already located
/// and buffered the frame, so none of these operations touch the socket.
/// Implementations must never yield bytes past their frame.
pub trait Reader {
    /// Returns the next `n` bytes without consuming them.
    fn peek(&mut self, n: usize) -> Result<&[u8], Error>;

    /// Returns and consumes the next `n` bytes.
    fn next(&mut self, n: usize) -> Result<&[u8], Error>;

    /// Consumes `n` bytes without returning them.
    fn skip(&mut self, n: usize) -> Result<(), Error>;

    /// Fills `buf` exactly, consuming `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error>;

    /// Returns and consumes bytes up to and including the first `delim`.
    fn until(&mut self, delim: u8) -> Result<&[u8], Error>;

    /// Total number of bytes this reader spans (the frame length).
    fn length(&self) -> usize;

    /// Bytes still consumable.
    fn remaining(&self) -> usize;
}

/// Buffered reader owning the connection's read half.
///
/// Maintains `read_idx <= write_idx <= buf.len()` at all times. The async
/// operations suspend until the requested bytes arrived; a short read from
/// the socket is retried until satisfied or the connection fails.
pub struct ChannelReader {
    io: Box<dyn AsyncRead + Send + Unpin>,
    buf: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
    consumed: u64,
}

// Compact the buffer once the dead prefix outgrows this threshold.
const COMPACT_THRESHOLD: usize = 4096;

impl ChannelReader {
    pub fn new(io: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            io: Box::new(io),
            buf: READ_BUFFERS.acquire(),
            read_idx: 0,
            write_idx: 0,
            consumed: 0,
        }
    }

    /// Total bytes consumed over the lifetime of the connection.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Opens a per-frame scope; see [`FrameReader`].
    pub fn begin_frame(&mut self) -> FrameReader<'_> {
        FrameReader::new(self)
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.write_idx - self.read_idx
    }

    /// The buffered, unconsumed bytes.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.read_idx..self.write_idx]
    }

    /// Ensures at least `n` unconsumed bytes are buffered.
    pub async fn fill(&mut self, n: usize) -> Result<(), Error> {
        let readable = self.write_idx - self.read_idx;
        if readable >= n {
            return Ok(());
        }
        let want = n - readable;
        self.make_room(want);

        let Self { io, buf, write_idx, .. } = self;
        io.read_exact(&mut buf[*write_idx..*write_idx + want])
            .await
            .map_err(Error::read_io)?;
        self.write_idx += want;
        Ok(())
    }

    /// Reads at least one more byte from the connection, however many are
    /// ready. Used by delimiter scans that do not know the frame extent in
    /// advance.
    pub async fn fill_some(&mut self) -> Result<usize, Error> {
        self.make_room(1);
        let Self { io, buf, write_idx, .. } = self;
        let n = io
            .read(&mut buf[*write_idx..])
            .await
            .map_err(Error::read_io)?;
        if n == 0 {
            return Err(Error::Eof);
        }
        self.write_idx += n;
        Ok(n)
    }

    /// Returns the next `n` bytes without consuming them, suspending until
    /// they arrive.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], Error> {
        self.fill(n).await?;
        Ok(&self.buf[self.read_idx..self.read_idx + n])
    }

    /// Returns and consumes the next `n` bytes.
    pub async fn next(&mut self, n: usize) -> Result<&[u8], Error> {
        self.fill(n).await?;
        let start = self.read_idx;
        self.advance(n);
        Ok(&self.buf[start..start + n])
    }

    /// Consumes the next `n` bytes.
    pub async fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.fill(n).await?;
        self.advance(n);
        Ok(())
    }

    /// Fills `buf` exactly from the stream.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let n = out.len();
        self.fill(n).await?;
        out.copy_from_slice(&self.buf[self.read_idx..self.read_idx + n]);
        self.advance(n);
        Ok(())
    }

    /// Returns and consumes bytes up to and including the first `delim`.
    pub async fn until(&mut self, delim: u8) -> Result<&[u8], Error> {
        let mut searched = 0usize;
        loop {
            let window = self.buffered();
            if let Some(pos) = window[searched..].iter().position(|b| *b == delim) {
                let end = searched + pos + 1;
                let start = self.read_idx;
                self.advance(end);
                return Ok(&self.buf[start..start + end]);
            }
            searched = window.len();
            self.fill_some().await?;
        }
    }

    // Sync variants for decorators operating on already-buffered frames.

    pub(crate) fn peek_buffered(&self, n: usize) -> Result<&[u8], Error> {
        if self.buffered_len() < n {
            return Err(Error::ShortBuffer { remain: self.buffered_len(), need: n });
        }
        Ok(&self.buf[self.read_idx..self.read_idx + n])
    }

    pub(crate) fn next_buffered(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.buffered_len() < n {
            return Err(Error::ShortBuffer { remain: self.buffered_len(), need: n });
        }
        let start = self.read_idx;
        self.advance(n);
        Ok(&self.buf[start..start + n])
    }

    pub(crate) fn skip_buffered(&mut self, n: usize) -> Result<(), Error> {
        if self.buffered_len() < n {
            return Err(Error::ShortBuffer { remain: self.buffered_len(), need: n });
        }
        self.advance(n);
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        self.read_idx += n;
        self.consumed += n as u64;
        debug_assert!(self.read_idx <= self.write_idx);
    }

    /// Makes sure `want` more bytes fit behind `write_idx`, compacting the
    /// dead prefix first and doubling the buffer when that is not enough.
    fn make_room(&mut self, want: usize) {
        if self.read_idx == self.write_idx {
            self.read_idx = 0;
            self.write_idx = 0;
        } else if self.read_idx >= COMPACT_THRESHOLD {
            self.buf.copy_within(self.read_idx..self.write_idx, 0);
            self.write_idx -= self.read_idx;
            self.read_idx = 0;
        }

        let needed = self.write_idx + want;
        if self.buf.len() < needed {
            let mut capacity = self.buf.len().max(64);
            while capacity < needed {
                capacity <<= 1;
            }
            self.buf.resize(capacity, 0);
        }
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        READ_BUFFERS.release(std::mem::take(&mut self.buf));
    }
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("read_idx", &self.read_idx)
            .field("write_idx", &self.write_idx)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// Scoped view over one frame's worth of reading.
///
/// Created by the transport handler for each inbound message; the frame
/// length it reports feeds the receive-size limit. Dropping the scope
/// releases nothing by itself; stream alignment is the limit reader's job.
pub struct FrameReader<'a> {
    inner: &'a mut ChannelReader,
    start: u64,
}

impl<'a> FrameReader<'a> {
    fn new(inner: &'a mut ChannelReader) -> Self {
        let start = inner.consumed;
        Self { inner, start }
    }

    /// Bytes consumed since this frame began.
    pub fn frame_len(&self) -> usize {
        (self.inner.consumed - self.start) as usize
    }

    pub fn inner(&mut self) -> &mut ChannelReader {
        &mut *self.inner
    }
}

/// Fixed-capacity reader over a caller-supplied slice. The counterpart of
/// [`ChannelReader`] for frames that are already in memory; running out of
/// bytes is a hard error because the view cannot grow.
pub struct WindowReader<'a> {
    buf: &'a [u8],
    read_idx: usize,
}

impl<'a> WindowReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, read_idx: 0 }
    }
}

impl Reader for WindowReader<'_> {
    fn peek(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.remaining() < n {
            return Err(Error::ShortBuffer { remain: self.remaining(), need: n });
        }
        Ok(&self.buf[self.read_idx..self.read_idx + n])
    }

    fn next(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.remaining() < n {
            return Err(Error::ShortBuffer { remain: self.remaining(), need: n });
        }
        let start = self.read_idx;
        self.read_idx += n;
        Ok(&self.buf[start..start + n])
    }

    fn skip(&mut self, n: usize) -> Result<(), Error> {
        if self.remaining() < n {
            return Err(Error::ShortBuffer { remain: self.remaining(), need: n });
        }
        self.read_idx += n;
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let bytes = self.next(out.len())?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn until(&mut self, delim: u8) -> Result<&[u8], Error> {
        let window = &self.buf[self.read_idx..];
        match window.iter().position(|b| *b == delim) {
            Some(pos) => self.next(pos + 1),
            None => Err(Error::ShortBuffer { remain: self.remaining(), need: self.remaining() + 1 }),
        }
    }

    fn length(&self) -> usize {
        self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.read_idx
    }
}
