// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! JSON payload codec over any serde-serializable message type.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    codec::PayloadCodec,
    error::Error,
    io::{Reader, Writer},
};

pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> PayloadCodec for JsonCodec<T>
where T: Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Message = T;

    fn name(&self) -> &'static str {
        "json-payload-codec"
    }

    fn marshal(&self, msg: &T, writer: &mut dyn Writer) -> Result<(), Error> {
        let bytes = serde_json::to_vec(msg)
            .map_err(|e| Error::Codec(format!("json marshal: {e}")))?;
        writer.write(&bytes)
    }

    fn unmarshal(&self, reader: &mut dyn Reader) -> Result<T, Error> {
        let bytes = reader.next(reader.remaining())?;
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("json unmarshal: {e}")))
    }
}
