//! WebSocket transport: accept loop and per-connection tasks.

use std::net::SocketAddr;

use atelier_protocol::wire::{decode_client_event, encode_server_event};
use atelier_protocol::ServerEvent;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::gateway::{Gateway, HandshakeError};

/// Transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind listener to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("Failed to determine bound address for {0}: {1}")]
    LocalAddrFailed(SocketAddr, std::io::Error),

    #[error("Failed to accept connection: {0}")]
    Accept(std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Bind the gateway listener.
pub async fn bind(address: SocketAddr) -> Result<TcpListener, TransportError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| TransportError::BindFailed(address, e))?;
    let bound = listener
        .local_addr()
        .map_err(|e| TransportError::LocalAddrFailed(address, e))?;
    info!("Gateway listening on ws://{}", bound);
    Ok(listener)
}

/// Accept connections forever, one task each.
pub async fn serve(listener: TcpListener, gateway: Gateway) -> Result<(), TransportError> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, gateway).await {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
}

type Reader = SplitStream<WebSocketStream<TcpStream>>;

/// Next text frame; `None` when the peer is gone.
async fn next_text(reader: &mut Reader) -> Option<Result<String, TransportError>> {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => return Some(Err(e.into())),
        }
    }
    None
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Gateway,
) -> Result<(), TransportError> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (mut writer, mut reader) = socket.split();
    debug!(%peer, "WebSocket connected");

    // The first frame must be the handshake
    let first = tokio::time::timeout(gateway.handshake_timeout(), next_text(&mut reader)).await;
    let admission = match first {
        Ok(Some(Ok(text))) => match decode_client_event(&text) {
            Ok(event) => gateway.admit(event).await,
            Err(e) => {
                debug!(%peer, error = %e, "Undecodable handshake");
                Err(HandshakeError::NotAHandshake)
            }
        },
        Ok(Some(Err(e))) => return Err(e),
        Ok(None) => return Ok(()),
        Err(_) => Err(HandshakeError::Timeout(gateway.handshake_timeout())),
    };

    let admission = match admission {
        Ok(admission) => admission,
        Err(e) => {
            let reason = e.rejection();
            info!(%peer, error = %e, ?reason, "Handshake rejected");
            if let Ok(text) = encode_server_event(&ServerEvent::Rejected { reason }) {
                writer.send(Message::Text(text.into())).await?;
            }
            let _ = writer.close().await;
            return Ok(());
        }
    };

    let (outbox, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();
    let writer_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match encode_server_event(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server event");
                    continue;
                }
            };
            if writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    let mut ctx = gateway.join(admission, outbox).await;
    while let Some(frame) = next_text(&mut reader).await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                debug!(connection = %ctx.id, error = %e, "Read failed");
                break;
            }
        };
        match decode_client_event(&text) {
            Ok(event) => gateway.handle_event(&mut ctx, event).await,
            Err(e) => {
                warn!(connection = %ctx.id, error = %e, "Undecodable event");
                ctx.reply(ServerEvent::Error {
                    message: format!("undecodable event: {e}"),
                });
            }
        }
    }

    gateway.leave(&ctx).await;
    // Last sender gone: the writer drains and closes
    drop(ctx);
    let _ = writer_task.await;
    Ok(())
}
