// WebSocket duplex channel for interactive sessions

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use livexec::{SessionChannel, SessionId, TerminalStatus};
use tracing::{debug, info};

use crate::AppState;

/// GET /sessions/:id/ws - Attach to a running session
pub async fn attach(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| {
        let (sink, stream) = socket.split();
        handle_socket(sink, stream, state, id)
    })
}

async fn handle_socket<Si, St>(sink: Si, stream: St, state: Arc<AppState>, raw_id: String)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let Some(id) = SessionId::parse(&raw_id) else {
        debug!(id = %raw_id, "malformed session id");
        return reject(sink).await;
    };
    match state.manager.attach(id) {
        Ok(channel) => {
            info!(session = %id, "client connected");
            let prefix = state.manager.config().channel.stderr_prefix.clone();
            relay(sink, stream, channel, prefix).await;
            info!(session = %id, "client disconnected");
        }
        Err(e) => {
            debug!(session = %id, error = %e, "attach refused");
            reject(sink).await;
        }
    }
}

/// Tell the client its session is invalid and close the socket
async fn reject<Si>(mut sink: Si)
where
    Si: Sink<Message> + Unpin,
{
    let message = TerminalStatus::InvalidSession.message().to_string();
    if sink.send(Message::Text(message)).await.is_ok() {
        let _ = sink.send(Message::Close(None)).await;
    }
}

async fn relay<Si, St>(mut sink: Si, mut stream: St, channel: SessionChannel, stderr_prefix: String)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let (input, mut output) = channel.into_parts();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = output.recv().await {
            let terminal = message.is_terminal();
            if sink
                .send(Message::Text(message.render(&stderr_prefix)))
                .await
                .is_err()
            {
                return;
            }
            if terminal {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                Message::Text(text) => {
                    for line in split_lines(&text) {
                        if input.send(line.to_string()).await.is_err() {
                            return;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        // Dropping the input side cancels the session, which then closes
        // the output side and lets the send task finish.
        _ = &mut recv_task => {
            let _ = send_task.await;
        }
    }
}

/// Split a text frame into stdin lines. An empty frame is one empty line.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }
    text.lines().collect()
}
