use anyhow::Result;
use axum::extract::ws::{Message, Utf8Bytes};
use tickbridge_model::{ClientMessage, StreamMessage};

/// Convert a StreamMessage to a WebSocket message
pub fn stream_to_websocket(msg: &StreamMessage) -> Result<Message> {
    let json = serde_json::to_string(msg)?;
    Ok(Message::Text(Utf8Bytes::from(json)))
}

/// Convert a WebSocket message to a ClientMessage
pub fn websocket_to_client(msg: &Message) -> Result<ClientMessage> {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(text.as_str())?;
            Ok(client_msg)
        }
        Message::Binary(bin) => {
            let client_msg: ClientMessage = serde_json::from_slice(bin.as_ref())?;
            Ok(client_msg)
        }
        _ => Err(anyhow::anyhow!("Unsupported message type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_messages_encode_as_text_frames() {
        let msg = StreamMessage::Keepalive {
            symbol: "NQZ25".into(),
            seq: 3,
            ts: chrono::Utc::now(),
        };
        let frame = stream_to_websocket(&msg).unwrap();
        assert!(matches!(frame, Message::Text(_)));
    }

    #[test]
    fn client_frames_decode_from_text_and_binary() {
        let text = Message::Text(Utf8Bytes::from(r#"{"type":"ack","seq":9}"#));
        assert_eq!(
            websocket_to_client(&text).unwrap(),
            ClientMessage::Ack { seq: 9 }
        );

        let binary = Message::Binary(br#"{"type":"close"}"#.to_vec().into());
        assert_eq!(websocket_to_client(&binary).unwrap(), ClientMessage::Close);
    }
}
