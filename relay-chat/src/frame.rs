use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::event::{Channel, ChatEvent};

/// One websocket text message: a channel name plus an untyped payload.
///
/// The payload is kept as the exact JSON text it arrived as, so the relay
/// forwards whatever a client sent byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Box<RawValue>,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel && self.payload.get() == other.payload.get()
    }
}

impl Frame {
    pub fn new(channel: Channel, event: &ChatEvent) -> serde_json::Result<Self> {
        Ok(Self {
            channel,
            payload: serde_json::value::to_raw_value(event)?,
        })
    }

    /// Interprets the payload as a [`ChatEvent`].
    pub fn event(&self) -> serde_json::Result<ChatEvent> {
        serde_json::from_str(self.payload.get())
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Status;

    #[test]
    fn decodes_typed_event_from_payload() {
        let frame = Frame::decode(
            r#"{"channel":"private-message","payload":{"senderName":"bob","receiverName":"alice","message":"yo","status":"MESSAGE"}}"#,
        )
        .expect("decode frame");

        assert_eq!(frame.channel, Channel::PrivateMessage);
        let event = frame.event().expect("typed payload");
        assert_eq!(event, ChatEvent::private("bob", "alice", "yo"));
        assert_eq!(event.status, Status::Message);
    }

    #[test]
    fn keeps_malformed_payload_untouched() {
        let raw = r#"{"channel":"message","payload":{ "zeta":1, "alpha":123456789012345678901234567890 }}"#;
        let frame = Frame::decode(raw).expect("envelope is still valid");

        assert!(frame.event().is_err());
        let expected = r#"{ "zeta":1, "alpha":123456789012345678901234567890 }"#;
        assert_eq!(frame.payload.get(), expected);

        let reencoded = Frame::decode(&frame.encode().expect("encode")).expect("decode");
        assert_eq!(reencoded.payload.get(), expected);
    }

    #[test]
    fn rejects_unknown_channel() {
        assert!(Frame::decode(r#"{"channel":"admin","payload":{}}"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }
}
