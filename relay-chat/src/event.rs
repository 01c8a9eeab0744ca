use std::fmt;

use serde::{Deserialize, Serialize};

/// Named event stream multiplexed over a single relay connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Public chatroom traffic and join announcements.
    Message,
    /// Direct messages. The relay still broadcasts these to everyone.
    PrivateMessage,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Message => "message",
            Channel::PrivateMessage => "private-message",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Join,
    Message,
}

/// The payload exchanged on both channels.
///
/// Field names follow the wire format (`senderName`, `receiverName`), and the
/// optional fields are omitted entirely when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: Status,
}

impl ChatEvent {
    pub fn join(sender: impl Into<String>) -> Self {
        Self {
            sender_name: sender.into(),
            receiver_name: None,
            message: None,
            status: Status::Join,
        }
    }

    pub fn public(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_name: sender.into(),
            receiver_name: None,
            message: Some(text.into()),
            status: Status::Message,
        }
    }

    pub fn private(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_name: sender.into(),
            receiver_name: Some(receiver.into()),
            message: Some(text.into()),
            status: Status::Message,
        }
    }

    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Name of the conversation partner as seen by `me`, if `me` takes part.
    pub fn counterpart(&self, me: &str) -> Option<&str> {
        let receiver = self.receiver_name.as_deref()?;
        if self.sender_name == me {
            Some(receiver)
        } else if receiver == me {
            Some(&self.sender_name)
        } else {
            None
        }
    }
}
