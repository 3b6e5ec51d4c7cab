//! JSON text framing for room events.

use thiserror::Error;

use crate::event::{ClientEvent, ServerEvent};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Largest accepted text frame. Whole trees travel in one frame.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

pub fn encode_client_event(event: &ClientEvent) -> Result<String, WireError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, WireError> {
    check_frame(text)?;
    Ok(serde_json::from_str(text)?)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, WireError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, WireError> {
    check_frame(text)?;
    Ok(serde_json::from_str(text)?)
}

fn check_frame(text: &str) -> Result<(), WireError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ClientKey, UserId};
    use chrono::Utc;

    #[test]
    fn client_message_survives_framing() {
        let event = ClientEvent::ProjectMessage {
            client_key: ClientKey::generate(),
            content: "@ai build me a server".into(),
            timestamp: Utc::now(),
            reply_to: None,
        };
        let text = encode_client_event(&event).unwrap();
        assert_eq!(decode_client_event(&text).unwrap(), event);
    }

    #[test]
    fn unknown_event_is_an_error() {
        assert!(decode_server_event(r#"{"event":"teleport"}"#).is_err());
        assert!(decode_client_event("not json").is_err());
    }

    #[test]
    fn oversized_frame_is_refused() {
        let text = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(matches!(
            decode_client_event(&text),
            Err(WireError::FrameTooLarge { .. })
        ));
        let ok = encode_server_event(&ServerEvent::StopTyping {
            sender: UserId::new("u"),
        })
        .unwrap();
        assert!(decode_server_event(&ok).is_ok());
    }
}
