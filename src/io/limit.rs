// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Residual-budget reader decorating a [`ChannelReader`].

use crate::{
    error::Error,
    io::reader::{ChannelReader, Reader},
};

/// Bounds reads to one frame's byte budget.
///
/// Packet codecs hand payload codecs a `LimitReader` so a decoder can read
/// "everything remaining in this packet" without ever touching the next
/// frame. On drop, any unconsumed budget is skipped on the underlying
/// reader, so the stream is aligned with the framing no matter how much of
/// the frame the payload codec actually read.
///
/// The constructor requires the full budget to be buffered already; every
/// operation is synchronous.
pub struct LimitReader<'a> {
    inner: &'a mut ChannelReader,
    total: usize,
    remain: usize,
}

impl<'a> LimitReader<'a> {
    /// Wraps `inner` with a budget of `limit` bytes. The caller must have
    /// filled at least `limit` bytes into `inner` beforehand.
    pub fn new(inner: &'a mut ChannelReader, limit: usize) -> Self {
        debug_assert!(inner.buffered_len() >= limit);
        Self { inner, total: limit, remain: limit }
    }

    fn charge(&self, want: usize) -> Result<(), Error> {
        if self.remain < want {
            return Err(Error::LimitExceeded { remain: self.remain, want });
        }
        Ok(())
    }
}

impl Reader for LimitReader<'_> {
    fn peek(&mut self, n: usize) -> Result<&[u8], Error> {
        self.charge(n)?;
        self.inner.peek_buffered(n)
    }

    fn next(&mut self, n: usize) -> Result<&[u8], Error> {
        self.charge(n)?;
        let bytes = self.inner.next_buffered(n)?;
        self.remain -= n;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.charge(n)?;
        self.inner.skip_buffered(n)?;
        self.remain -= n;
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let bytes = self.next(out.len())?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn until(&mut self, delim: u8) -> Result<&[u8], Error> {
        let window = self.inner.peek_buffered(self.remain)?;
        match window.iter().position(|b| *b == delim) {
            Some(pos) => self.next(pos + 1),
            None => Err(Error::LimitExceeded { remain: self.remain, want: self.remain + 1 }),
        }
    }

    /// The full frame budget, regardless of how much has been consumed.
    fn length(&self) -> usize {
        self.total
    }

    fn remaining(&self) -> usize {
        self.remain
    }
}

impl Drop for LimitReader<'_> {
    fn drop(&mut self) {
        if self.remain > 0 {
            // keep the underlying stream aligned with the frame boundary
            let _ = self.inner.skip_buffered(self.remain);
            self.remain = 0;
        }
    }
}
