// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Codec contracts.
//!
//! A [`PacketCodec`] frames the byte stream into discrete messages; a
//! [`PayloadCodec`] turns the bytes inside one frame into the application
//! message type and back. The packet codec owns the socket-facing async
//! work (locating the frame, flushing); by the time the payload codec runs,
//! its entire frame is buffered, so the payload surface is synchronous and
//! object-safe.
//!
//! Payload marshal/unmarshal is the only place application code executes on
//! the read and write drivers, so both calls run under a panic guard and a
//! panic surfaces as an [`Error::Panic`] close reason.

use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
};

use crate::{
    error::Error,
    io::{ChannelReader, FrameWriter, Reader, Writer},
};

pub mod control;
pub mod packet;
pub mod payload;

/// Marshals the application message type into frame bodies and back.
pub trait PayloadCodec: Send + Sync + 'static {
    type Message: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Stages the wire form of `msg` into `writer`.
    fn marshal(&self, msg: &Self::Message, writer: &mut dyn Writer) -> Result<(), Error>;

    /// Decodes one message from a frame-bounded reader. `reader` never
    /// yields bytes past the frame; unread remainder is skipped by the
    /// framing layer afterwards.
    fn unmarshal(&self, reader: &mut dyn Reader) -> Result<Self::Message, Error>;
}

/// Frames a byte stream into discrete messages.
///
/// `encode` writes one self-delimiting frame and flushes exactly once as
/// its final step. `decode` consumes exactly one frame, never a byte of
/// the next one, and returns the unmarshaled message.
pub trait PacketCodec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn encode<P: PayloadCodec>(
        &self,
        msg: &P::Message,
        writer: &mut FrameWriter<'_>,
        payload: &P,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn decode<P: PayloadCodec>(
        &self,
        reader: &mut ChannelReader,
        payload: &P,
    ) -> impl Future<Output = Result<P::Message, Error>> + Send;
}

/// Runs a payload-codec call under a panic guard.
pub(crate) fn guard<R>(f: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload)),
    }
}
