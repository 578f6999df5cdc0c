// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! UTF-8 text payload codec, the default.

use crate::{
    codec::PayloadCodec,
    error::Error,
    io::{Reader, Writer},
};

#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl TextCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadCodec for TextCodec {
    type Message = String;

    fn name(&self) -> &'static str {
        "text-payload-codec"
    }

    fn marshal(&self, msg: &String, writer: &mut dyn Writer) -> Result<(), Error> {
        writer.write(msg.as_bytes())
    }

    fn unmarshal(&self, reader: &mut dyn Reader) -> Result<String, Error> {
        let bytes = reader.next(reader.remaining())?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Error::Codec(format!("invalid utf-8 payload: {e}")))
    }
}
