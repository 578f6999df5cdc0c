// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-length framing: every frame is exactly `length` body bytes, no
//! header.

use std::future::Future;

use crate::{
    codec::{PacketCodec, PayloadCodec, guard},
    error::Error,
    io::{ChannelReader, FrameWriter, LimitReader, WindowWriter, Writer},
};

#[derive(Debug, Clone, Copy)]
pub struct FixedLengthCodec {
    length: usize,
}

impl FixedLengthCodec {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl PacketCodec for FixedLengthCodec {
    fn name(&self) -> &'static str {
        "fixed-length-packet-codec"
    }

    fn encode<P: PayloadCodec>(
        &self,
        msg: &P::Message,
        writer: &mut FrameWriter<'_>,
        payload: &P,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        async move {
            // marshal into the reserved window; payloads larger than the
            // frame fail with ShortBuffer, shorter ones are zero-padded
            let window = writer.reserve(self.length)?;
            let mut body = WindowWriter::new(writer.window_mut(&window));
            guard(|| payload.marshal(msg, &mut body))?;

            writer.flush().await
        }
    }

    fn decode<P: PayloadCodec>(
        &self,
        reader: &mut ChannelReader,
        payload: &P,
    ) -> impl Future<Output = Result<P::Message, Error>> + Send {
        async move {
            reader.fill(self.length).await?;
            let mut body = LimitReader::new(reader, self.length);
            guard(|| payload.unmarshal(&mut body))
        }
    }
}
