//! Streaming connection reader.
//!
//! Real-user sessions use the RTM WebSocket (`rtm.connect`); bot sessions
//! use socket mode (`apps.connections.open`), whose frames arrive wrapped in
//! envelopes that must be acked. Both feed the same `SlackEvent` channel.
//!
//! The reader task owns the socket. It replies to pings, acks socket-mode
//! envelopes, and forwards every parsed event. When the socket closes the
//! event channel closes with it; reconnecting with back-off is the session
//! manager's responsibility, not this module's.

use crate::client::SlackError;
use crate::events::SlackEvent;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

/// Buffered events between the socket reader and the session consumer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// RtmHandle
// ---------------------------------------------------------------------------

/// Cloneable writer handle for the outbound side of the socket.
#[derive(Clone)]
pub struct RtmHandle {
    tx: mpsc::Sender<Value>,
}

impl RtmHandle {
    /// Send a typing indicator for `channel`.
    pub async fn send_typing(&self, channel: &str) -> Result<(), SlackError> {
        self.send(json!({"type": "typing", "channel": channel}))
            .await
    }

    async fn send(&self, message: Value) -> Result<(), SlackError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SlackError::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

/// Open the WebSocket at `ws_url` and spawn the reader/writer tasks.
///
/// Returns the outbound handle and the inbound event channel. `socket_mode`
/// switches on envelope unwrapping and acking.
pub async fn connect(
    ws_url: &str,
    socket_mode: bool,
) -> Result<(RtmHandle, mpsc::Receiver<SlackEvent>), SlackError> {
    let (ws, _response) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| SlackError::Ws(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(32);
    let ack_tx = out_tx.clone();

    // Writer: serialize outbound frames (typing, socket-mode acks).
    tokio::spawn(async move {
        let mut next_id: u64 = 1;
        while let Some(mut frame) = out_rx.recv().await {
            if frame.get("type").is_some() && frame.get("envelope_id").is_none() {
                frame["id"] = json!(next_id);
                next_id += 1;
            }
            let text = frame.to_string();
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: parse frames into events until the socket closes.
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let Some(event) = parse_frame(&text, socket_mode, &ack_tx).await else {
                        continue;
                    };
                    if event_tx.send(event).await.is_err() {
                        // Consumer gone; stop reading.
                        break;
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // tungstenite answers pings at the protocol layer.
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        debug!("stream reader finished");
        // event_tx drops here, closing the channel.
    });

    Ok((RtmHandle { tx: out_tx }, event_rx))
}

/// Parse one text frame. Socket-mode envelopes are acked and unwrapped;
/// unparseable frames are logged and skipped.
async fn parse_frame(
    text: &str,
    socket_mode: bool,
    ack_tx: &mpsc::Sender<Value>,
) -> Option<SlackEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable stream frame");
            return None;
        }
    };

    let payload = if socket_mode {
        match value.get("envelope_id").and_then(Value::as_str) {
            Some(envelope_id) => {
                let _ = ack_tx.send(json!({"envelope_id": envelope_id})).await;
                value.pointer("/payload/event").cloned()?
            }
            // Socket-mode hello and disconnect frames have no envelope.
            None => value,
        }
    } else {
        value
    };

    match serde_json::from_value::<SlackEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "stream frame did not decode as an event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_frame_parses_to_event() {
        let (tx, _rx) = mpsc::channel(1);
        let event = parse_frame(r#"{"type":"hello"}"#, false, &tx).await;
        assert!(matches!(event, Some(SlackEvent::Hello(_))));
    }

    #[tokio::test]
    async fn socket_mode_envelope_is_acked_and_unwrapped() {
        let (tx, mut rx) = mpsc::channel(1);
        let frame = r#"{
            "envelope_id": "abc",
            "payload": {"event": {"type": "message", "channel": "C1", "ts": "1.0", "user": "U1"}}
        }"#;
        let event = parse_frame(frame, true, &tx).await;
        assert!(matches!(event, Some(SlackEvent::Message(_))));
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack["envelope_id"], "abc");
    }

    #[tokio::test]
    async fn garbage_frame_is_skipped() {
        let (tx, _rx) = mpsc::channel(1);
        assert!(parse_frame("not json", false, &tx).await.is_none());
    }
}
