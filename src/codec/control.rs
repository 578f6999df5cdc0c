// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Built-in control frames and the decorator that routes them.
//!
//! Keepalive needs a wire form for Ping/Pong/GoAway that coexists with
//! whatever payload format the application chose. A [`ControlFrame`] starts
//! with a magic word; [`ControlCodec`] decorates the application's payload
//! codec and inspects that word: frames carrying the magic are decoded as
//! control traffic, everything else is handed to the wrapped codec
//! unchanged. The channel's message type becomes the [`ControlMessage`]
//! tagged union.

use bytes::Bytes;
use zerocopy::{BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32};

use crate::{
    codec::PayloadCodec,
    error::Error,
    io::{Reader, Writer},
};

/// Marks a frame as framework control traffic.
pub const MAGIC: u32 = 76_698_383;

pub const HEADER_LEN: usize = 6;

/// Control frame kinds.
pub const MSG_TYPE_CALL: u16 = 1;
pub const MSG_TYPE_REPLY: u16 = 2;
pub const MSG_TYPE_ONEWAY: u16 = 3;

const PING_BODY: &[u8] = b"Ping";
const PONG_BODY: &[u8] = b"Pong";
const GO_AWAY_BODY: &[u8] = b"Go Away";

/// Wire header of a control frame.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
struct ControlHeader {
    magic: U32<BigEndian>,    // 0..4
    msg_type: U16<BigEndian>, // 4..6
}

/// A framework control message: `{magic, msg_type, body}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    pub msg_type: u16,
    pub body: Bytes,
}

impl ControlFrame {
    pub fn new(msg_type: u16, body: impl Into<Bytes>) -> Self {
        Self { msg_type, body: body.into() }
    }

    pub fn ping() -> Self {
        Self::new(MSG_TYPE_CALL, PING_BODY)
    }

    pub fn pong() -> Self {
        Self::new(MSG_TYPE_REPLY, PONG_BODY)
    }

    pub fn go_away() -> Self {
        Self::new(MSG_TYPE_ONEWAY, GO_AWAY_BODY)
    }

    pub fn is_ping(&self) -> bool {
        self.msg_type == MSG_TYPE_CALL && self.body == PING_BODY
    }

    pub fn is_pong(&self) -> bool {
        self.msg_type == MSG_TYPE_REPLY && self.body == PONG_BODY
    }

    pub fn is_go_away(&self) -> bool {
        self.msg_type == MSG_TYPE_ONEWAY && self.body == GO_AWAY_BODY
    }
}

/// Tagged union of control and application traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage<M> {
    Control(ControlFrame),
    App(M),
}

impl<M> ControlMessage<M> {
    pub fn app(msg: M) -> Self {
        ControlMessage::App(msg)
    }

    pub fn as_control(&self) -> Option<&ControlFrame> {
        match self {
            ControlMessage::Control(frame) => Some(frame),
            ControlMessage::App(_) => None,
        }
    }

    pub fn into_app(self) -> Option<M> {
        match self {
            ControlMessage::Control(_) => None,
            ControlMessage::App(msg) => Some(msg),
        }
    }
}

/// Payload-codec decorator dispatching on the control magic.
pub struct ControlCodec<P> {
    inner: P,
}

impl<P> ControlCodec<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: PayloadCodec> PayloadCodec for ControlCodec<P> {
    type Message = ControlMessage<P::Message>;

    fn name(&self) -> &'static str {
        "control-payload-codec"
    }

    fn marshal(&self, msg: &Self::Message, writer: &mut dyn Writer) -> Result<(), Error> {
        match msg {
            ControlMessage::Control(frame) => {
                let header = ControlHeader {
                    magic: U32::new(MAGIC),
                    msg_type: U16::new(frame.msg_type),
                };
                writer.write(header.as_bytes())?;
                writer.write(&frame.body)
            }
            ControlMessage::App(inner) => self.inner.marshal(inner, writer),
        }
    }

    fn unmarshal(&self, reader: &mut dyn Reader) -> Result<Self::Message, Error> {
        // too short for a control header, or wrong magic: application frame
        if reader.remaining() < HEADER_LEN {
            return self.inner.unmarshal(reader).map(ControlMessage::App);
        }
        let magic = reader.peek(4)?;
        if u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]) != MAGIC {
            return self.inner.unmarshal(reader).map(ControlMessage::App);
        }

        let header_bytes = reader.next(HEADER_LEN)?;
        let header = ControlHeader::read_from_bytes(header_bytes)
            .map_err(|e| Error::Codec(format!("control header: {e}")))?;
        let body = reader.next(reader.remaining())?;
        Ok(ControlMessage::Control(ControlFrame {
            msg_type: header.msg_type.get(),
            body: Bytes::copy_from_slice(body),
        }))
    }
}
