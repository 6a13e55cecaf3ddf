use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::transport::message::{ClientFrame, decode};
use crate::utils::Result;

pub const GATEWAY_PATH: &str = "/ws";

/// Binds `addr` and serves the WebSocket gateway until the task is dropped.
pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket gateway listening on ws://{addr}{GATEWAY_PATH}");
    serve(listener, broker).await;
    Ok(())
}

/// Accepts connections on an already-bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, broker).await {
                        warn!(%peer, "connection ended with error: {e}");
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

fn check_path(request: &Request, response: Response) -> std::result::Result<Response, ErrorResponse> {
    if request.uri().path() == GATEWAY_PATH {
        return Ok(response);
    }
    let mut rejection = ErrorResponse::new(Some(format!("no gateway at {}", request.uri().path())));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

/// One client for its whole lifetime: attach to a subscriber shard, pump
/// outbound frames from the session channel, feed inbound topic lists to
/// the subscriber, detach on close.
async fn handle_connection(stream: TcpStream, broker: Arc<Broker>) -> Result<()> {
    let ws_stream = accept_hdr_async(stream, check_path).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let subscriber = broker.next_subscriber()?;
    let session = subscriber.connect(tx).await?;
    debug!(session = %session, subscriber = %subscriber.id, "client connected");

    // Ends when the subscriber drops the session's sender or after a close
    // frame went out.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = frame.is_close();
            if let Err(e) = ws_sender.send(frame).await {
                debug!(session = %session, "send loop closed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(frame) => match decode(frame) {
                ClientFrame::Topics(text) => subscriber.set_topics(session, text)?,
                ClientFrame::Close => break,
                ClientFrame::Ignored => {}
            },
            Err(e) => {
                debug!(session = %session, "read loop closed: {e}");
                break;
            }
        }
    }

    subscriber.disconnect(session)?;
    debug!(session = %session, "client disconnected");
    Ok(())
}
