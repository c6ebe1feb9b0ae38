//! Websocket listener: one connection, sessions run one after another.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    app::AppState,
    pipeline::{DeliveryError, FrameSink, SessionError},
    validation::parse_session_request,
};

/// Messages received while a session is running wait here. Anything past
/// the backlog is dropped so the reader can still see a close.
const INBOUND_BACKLOG: usize = 16;

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| DeliveryError::Write(e.to_string()))
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_bytes = state.config.ws_max_message_bytes;
    ws.max_message_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let span = info_span!("connection", connection_id = %connection_id);
    serve_connection(socket, state).instrument(span).await
}

async fn serve_connection(socket: WebSocket, state: AppState) {
    info!("client connected");
    let (mut sink, stream) = socket.split();
    let closed = CancellationToken::new();
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(INBOUND_BACKLOG);
    let reader = tokio::spawn(read_inbound(stream, inbound_tx, closed.clone()).in_current_span());

    while let Some(raw) = inbound_rx.recv().await {
        debug!(len = raw.len(), "message received");
        let prompt = match parse_session_request(&raw, state.config.max_message_chars) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "rejecting payload");
                state.metrics.payload_rejected();
                let written = tokio::select! {
                    _ = closed.cancelled() => break,
                    written = sink.send_text(e.to_message().to_json()) => written,
                };
                if written.is_err() {
                    break;
                }
                continue;
            }
        };

        state.metrics.session_started();
        let outcome = state.orchestrator.run(&prompt, &mut sink, closed.clone()).await;
        state.metrics.session_finished(&outcome);

        match outcome {
            Ok(_) => {}
            Err(SessionError::Cancelled) | Err(SessionError::Delivery(_)) => break,
            // Already reported to the client; the connection stays usable.
            Err(e) => warn!(error = %e, "session ended with error"),
        }
    }

    closed.cancel();
    reader.abort();
    let _ = sink.close().await;
    info!("connection closed");
}

/// Forward text messages to the handler; cancel the connection when the
/// client goes away.
async fn read_inbound<S>(mut stream: S, inbound: mpsc::Sender<String>, closed: CancellationToken)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match inbound.try_send(text.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!(
                        len = dropped.len(),
                        backlog = INBOUND_BACKLOG,
                        "inbound backlog full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(Message::Binary(_)) => warn!("ignoring binary message"),
            Ok(Message::Close(_)) => {
                info!("client sent close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    closed.cancel();
}
