// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Delimiter framing: a frame is everything up to and including the first
//! occurrence of a configured delimiter sequence.

use std::future::Future;

use crate::{
    codec::{PacketCodec, PayloadCodec, guard},
    error::Error,
    io::{ChannelReader, FrameWriter, LimitReader, Writer},
};

/// Delimiter-framed packet codec.
///
/// `max_length` bounds the scan: the delimiter must end within the first
/// `max_length` bytes of the frame, or decoding fails with
/// [`Error::FrameOversize`]. On encode the delimiter is appended
/// automatically unless disabled; on decode it is stripped from the payload
/// unless disabled.
#[derive(Debug, Clone)]
pub struct DelimiterCodec {
    delimiter: Vec<u8>,
    max_length: usize,
    auto_append: bool,
    strip: bool,
}

impl DelimiterCodec {
    pub fn new(delimiter: impl Into<Vec<u8>>, max_length: usize) -> Self {
        let delimiter = delimiter.into();
        debug_assert!(!delimiter.is_empty());
        Self { delimiter, max_length, auto_append: true, strip: true }
    }

    /// Keeps `encode` from appending the delimiter; the payload codec is
    /// then responsible for terminating its own frames.
    pub fn disable_auto_append(mut self) -> Self {
        self.auto_append = false;
        self
    }

    /// Hands the delimiter bytes to the payload codec instead of stripping
    /// them from the frame.
    pub fn disable_strip(mut self) -> Self {
        self.strip = false;
        self
    }

    /// Finds the scan offset one past the delimiter, buffering more bytes
    /// until it is found or the scan window is exhausted.
    async fn scan(&self, reader: &mut ChannelReader) -> Result<usize, Error> {
        let dlen = self.delimiter.len();
        let mut searched = 0usize;
        loop {
            let window = reader.buffered();
            let cap = window.len().min(self.max_length);
            if cap >= dlen {
                // resume the search overlapping the previous tail in case
                // the delimiter straddled two fills
                let from = searched.saturating_sub(dlen - 1);
                if let Some(pos) = window[from..cap]
                    .windows(dlen)
                    .position(|w| w == self.delimiter.as_slice())
                {
                    return Ok(from + pos + dlen);
                }
            }
            if window.len() >= self.max_length {
                return Err(Error::FrameOversize);
            }
            searched = window.len();
            reader.fill_some().await?;
        }
    }
}

impl PacketCodec for DelimiterCodec {
    fn name(&self) -> &'static str {
        "delimiter-packet-codec"
    }

    fn encode<P: PayloadCodec>(
        &self,
        msg: &P::Message,
        writer: &mut FrameWriter<'_>,
        payload: &P,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        async move {
            guard(|| payload.marshal(msg, writer))?;
            if self.auto_append {
                writer.write(&self.delimiter)?;
            }
            writer.flush().await
        }
    }

    fn decode<P: PayloadCodec>(
        &self,
        reader: &mut ChannelReader,
        payload: &P,
    ) -> impl Future<Output = Result<P::Message, Error>> + Send {
        async move {
            let frame_end = self.scan(reader).await?;
            let body_len = if self.strip {
                frame_end - self.delimiter.len()
            } else {
                frame_end
            };

            let msg = {
                let mut body = LimitReader::new(reader, body_len);
                guard(|| payload.unmarshal(&mut body))?
            };

            if self.strip {
                // the delimiter sits past the payload budget; consume it so
                // the next frame starts clean
                reader.skip_buffered(self.delimiter.len())?;
            }
            Ok(msg)
        }
    }
}
