use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::IntoResponse,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::{AppEvent, EventSender};
use crate::state::ServiceContext;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ServiceContext>,
) -> impl IntoResponse {
    let event_rx = ctx.event_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, ctx.event_tx, event_rx))
}

/// Parse an incoming frame as a roster or call-lifecycle event and put it on
/// the bus. Anything else is ignored.
fn ingest(text: &str, event_tx: &EventSender) {
    match serde_json::from_str::<AppEvent>(text) {
        Ok(event) if event.is_external() => {
            let _ = event_tx.send(event);
        }
        Ok(event) => {
            warn!("Ignoring locally-owned event from WebSocket client: {:?}", event);
        }
        Err(e) => {
            debug!("Ignoring unparsable WebSocket message: {}", e);
        }
    }
}

async fn handle_socket(mut socket: WebSocket, event_tx: EventSender, mut event_rx: broadcast::Receiver<AppEvent>) {
    debug!("WebSocket client connected");

    loop {
        tokio::select! {
            // Forward AppEvents to the WebSocket client as JSON
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if socket.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            // The client is the roster feed
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => ingest(&text, &event_tx),
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_feed_events_are_ingested() {
        let (tx, mut rx) = crate::events::create_event_bus();

        ingest(r#"{"type":"CallEnded","data":{"channel_id":"voice-1"}}"#, &tx);
        ingest(r#"{"type":"SpeakingChanged","data":{"participant_id":"x","speaking":true}}"#, &tx);
        ingest("not json", &tx);

        assert!(matches!(rx.try_recv(), Ok(AppEvent::CallEnded { .. })));
        assert!(rx.try_recv().is_err());
    }
}
