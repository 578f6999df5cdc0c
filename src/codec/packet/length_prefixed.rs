// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed framing: a 4-byte big-endian u32 body length followed by
//! the body.

use std::future::Future;

use crate::{
    codec::{PacketCodec, PayloadCodec, guard},
    error::Error,
    io::{ChannelReader, FrameWriter, LimitReader, Writer},
};

pub const HEADER_LEN: usize = 4;

/// The default packet codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixedCodec;

impl LengthPrefixedCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PacketCodec for LengthPrefixedCodec {
    fn name(&self) -> &'static str {
        "length-prefixed-packet-codec"
    }

    fn encode<P: PayloadCodec>(
        &self,
        msg: &P::Message,
        writer: &mut FrameWriter<'_>,
        payload: &P,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        async move {
            let header = writer.reserve(HEADER_LEN)?;
            let body_start = writer.written();
            guard(|| payload.marshal(msg, writer))?;

            let body_len = writer.written() - body_start;
            let body_len = u32::try_from(body_len).map_err(|_| Error::FrameOversize)?;
            writer.patch(&header, &body_len.to_be_bytes())?;

            writer.flush().await
        }
    }

    fn decode<P: PayloadCodec>(
        &self,
        reader: &mut ChannelReader,
        payload: &P,
    ) -> impl Future<Output = Result<P::Message, Error>> + Send {
        async move {
            let header = reader.next(HEADER_LEN).await?;
            let body_len =
                u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;

            reader.fill(body_len).await?;
            let mut body = LimitReader::new(reader, body_len);
            guard(|| payload.unmarshal(&mut body))
        }
    }
}
