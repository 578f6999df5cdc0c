// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP binding: accept loop, dialer, and the per-connection read driver.
//!
//! Contract with the handler: `on_connect` once, then `on_message` until it
//! reports end-of-stream or error, then `on_conn_closed` with the surfaced
//! reason. The read loop proper runs in its own spawned task so a panic
//! anywhere inside it is caught at the join boundary and becomes the close
//! reason.

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    channel::{Channel, Side},
    codec::{PacketCodec, PayloadCodec},
    context::Context,
    error::Error,
    io::ChannelReader,
    transport::{conn::Conn, handler::TransHandler},
};

use std::sync::Arc;

/// Admits one wrapped connection and starts its read driver. Returns the
/// activated channel; on refusal the raw connection is closed.
pub(crate) async fn establish<C, P>(
    handler: &TransHandler<C, P>,
    conn: Arc<Conn>,
    reader: ChannelReader,
    side: Side,
) -> Result<Arc<Channel<P::Message>>, Error>
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    let ch = match handler
        .on_connect(Context::new(), Arc::clone(&conn), side)
        .await
    {
        Ok(ch) => ch,
        Err(err) => {
            conn.close().await;
            return Err(err);
        }
    };

    let supervisor_handler = handler.clone();
    let supervised = Arc::clone(&ch);
    tokio::spawn(async move {
        let driver = tokio::spawn(read_loop(
            supervisor_handler.clone(),
            Arc::clone(&supervised),
            reader,
        ));
        let reason = match driver.await {
            Ok(reason) => reason,
            Err(join_err) if join_err.is_panic() => Error::Panic(join_err.to_string()),
            Err(_) => Error::Eof,
        };
        supervisor_handler.on_conn_closed(&supervised, reason).await;
    });

    Ok(ch)
}

/// Reads frames until the connection dies, the channel is torn down, or
/// the handler reports a fatal error. The return value is the close
/// reason handed to `on_conn_closed`.
async fn read_loop<C, P>(
    handler: TransHandler<C, P>,
    ch: Arc<Channel<P::Message>>,
    mut reader: ChannelReader,
) -> Error
where
    C: PacketCodec,
    P: PayloadCodec,
    P::Message: Clone,
{
    let cancel = ch.conn().cancel_token().clone();
    loop {
        tokio::select! {
            // channel teardown from elsewhere (keeper, shutdown): stop
            // reading; the close reason was already delivered
            _ = cancel.cancelled() => return Error::AlreadyClosed,
            result = handler.on_message(&ch, &mut reader) => {
                match result {
                    Ok(()) => {}
                    Err(err) => return err,
                }
            }
        }
    }
}

/// Accept-loop transport. One listener feeding one handler; each accepted
/// connection gets its own read driver.
pub struct TcpTransport;

impl TcpTransport {
    /// Serves until `shutdown` fires. Accept errors are logged and the
    /// loop keeps going; refusals are handled inside `establish`.
    pub async fn serve<C, P>(
        listener: TcpListener,
        handler: TransHandler<C, P>,
        shutdown: CancellationToken,
    ) -> Result<(), Error>
    where
        C: PacketCodec,
        P: PayloadCodec,
        P::Message: Clone,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "receive a connect request");
                            let (conn, reader) = match Conn::wrap_stream(stream) {
                                Ok(wrapped) => wrapped,
                                Err(err) => {
                                    warn!(%peer, %err, "failed to wrap connection");
                                    continue;
                                }
                            };
                            if let Err(err) =
                                establish(&handler, conn, reader, Side::Server).await
                            {
                                debug!(%peer, %err, "connection not admitted");
                            }
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Dials a peer and returns the activated client-side channel.
    pub async fn dial<C, P>(
        addr: impl ToSocketAddrs,
        handler: &TransHandler<C, P>,
    ) -> Result<Arc<Channel<P::Message>>, Error>
    where
        C: PacketCodec,
        P: PayloadCodec,
        P::Message: Clone,
    {
        let stream = TcpStream::connect(addr).await.map_err(Error::read_io)?;
        let (conn, reader) = Conn::wrap_stream(stream).map_err(Error::read_io)?;
        establish(handler, conn, reader, Side::Client).await
    }
}
