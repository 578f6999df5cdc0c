// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy for the transport core.
//!
//! Framing and protocol errors are fatal to the channel that produced them;
//! lifecycle errors are returned to the caller and leave the channel alive.
//! Errors are `Clone` because a single close reason fans out to every
//! `OnChannelClosed` hook and to the registry bookkeeping, so I/O failures
//! are captured as `(ErrorKind, message)` instead of carrying the
//! non-cloneable `std::io::Error` itself.

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A frame exceeded the codec's maximum length before it could be
    /// delimited, or staged more bytes than `max_send_message_size`.
    #[error("message package size greater than max length")]
    FrameOversize,

    /// A fixed-capacity buffer could not hold the requested bytes.
    #[error("buffer not enough, remain: {remain}, need: {need}")]
    ShortBuffer { remain: usize, need: usize },

    /// A read went past the residual budget of a limit reader.
    #[error("read budget exhausted, remain: {remain}, want: {want}")]
    LimitExceeded { remain: usize, want: usize },

    /// The underlying connection failed while reading.
    #[error("read failed: {kind}: {message}")]
    ReadFailed { kind: io::ErrorKind, message: String },

    /// The underlying connection failed while writing or flushing.
    #[error("write failed: {kind}: {message}")]
    WriteFailed { kind: io::ErrorKind, message: String },

    /// The peer closed the connection; surfaced by the read loop when a
    /// frame boundary coincides with EOF.
    #[error("connection reached end of stream")]
    Eof,

    /// A payload codec failed to marshal or unmarshal a message.
    #[error("payload codec: {0}")]
    Codec(String),

    /// `Close` lost the race against another closer.
    #[error("channel already closed")]
    AlreadyClosed,

    /// The read side of the channel is shut; no inbound task may start.
    #[error("channel reader closed")]
    ReaderClosed,

    /// The write side of the channel is shut; `write` is rejected.
    #[error("channel writer closed")]
    WriterClosed,

    /// Admission control rejected a new connection.
    #[error("connection number out of limit")]
    ConnectionRefused,

    /// The transport handler is shutting down or already closed.
    #[error("transport has been closed")]
    TransportClosed,

    /// An `OnChannel` hook aborted activation.
    #[error("channel activation failed: {0}")]
    ActivationFailed(String),

    #[error("closing channel due to maximum idle time")]
    IdleTimeout,

    #[error("closing channel due to maximum channel age")]
    MaxAge,

    #[error("closing channel due to ping timeout")]
    PingTimeout,

    #[error("closing channel due to ping failed")]
    PingFailed,

    #[error("closing channel due to received a go away message")]
    ReceivedGoAway,

    /// A panic captured at one of the recovery boundaries.
    #[error("panic: {0}")]
    Panic(String),

    /// Close-side drain did not finish within the supplied bound.
    #[error("drain timed out with {pending} tasks in flight")]
    DrainTimeout { pending: usize },

    /// Application-level failure bubbled through a middleware chain.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wraps an I/O failure observed on the read path. A clean EOF is
    /// reported as [`Error::Eof`] so the read loop can tell orderly
    /// shutdown apart from transport failure.
    pub fn read_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::Eof;
        }
        Error::ReadFailed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Wraps an I/O failure observed on the write path.
    pub fn write_io(err: io::Error) -> Self {
        Error::WriteFailed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// True when the error must close the channel that produced it.
    /// Framing and protocol errors poison the byte stream: once framing is
    /// lost there is no way to resynchronize.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FrameOversize
                | Error::ShortBuffer { .. }
                | Error::LimitExceeded { .. }
                | Error::ReadFailed { .. }
                | Error::WriteFailed { .. }
                | Error::Eof
                | Error::Codec(_)
                | Error::Panic(_)
        )
    }

    /// Renders the payload of a caught panic. `std::panic` hands back a
    /// `Box<dyn Any>`; the two shapes produced by `panic!` are `&str` and
    /// `String`, anything else is opaque.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panic(message)
    }
}
