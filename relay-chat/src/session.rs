use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::{
    conversation::{Change, Conversations, Update},
    event::{Channel, ChatEvent},
    frame::Frame,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username cannot be empty")]
    EmptyUsername,
    #[error("already joined as '{0}'")]
    AlreadyJoined(String),
    #[error("join the chat before sending messages")]
    NotJoined,
    #[error("relay channel is closed")]
    ChannelClosed,
    #[error("failed to encode event")]
    Encode(#[from] serde_json::Error),
}

/// Outgoing side of a relay connection.
pub trait EventChannel {
    fn emit(&mut self, frame: Frame) -> Result<(), SessionError>;
}

impl EventChannel for mpsc::UnboundedSender<Frame> {
    fn emit(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.send(frame).map_err(|_| SessionError::ChannelClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected { username: String },
}

/// One user's view of the chat: identity, compose buffer and conversation state.
///
/// Every change to the conversations is published as a fresh snapshot on a
/// watch channel; see [`Session::subscribe`].
pub struct Session<C> {
    channel: C,
    state: SessionState,
    draft: String,
    snapshot: watch::Sender<Arc<Conversations>>,
}

impl<C: EventChannel> Session<C> {
    pub fn new(channel: C) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Conversations::new()));
        Self {
            channel,
            state: SessionState::Disconnected,
            draft: String::new(),
            snapshot,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Connected { username } => Some(username),
            SessionState::Disconnected => None,
        }
    }

    pub fn conversations(&self) -> Arc<Conversations> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Conversations>> {
        self.snapshot.subscribe()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn join(&mut self, username: &str) -> Result<(), SessionError> {
        if let SessionState::Connected { username } = &self.state {
            return Err(SessionError::AlreadyJoined(username.clone()));
        }
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }

        self.channel
            .emit(Frame::new(Channel::Message, &ChatEvent::join(username))?)?;
        self.state = SessionState::Connected {
            username: username.to_string(),
        };
        Ok(())
    }

    /// Sends `text` to the public room. Returns `false` when there was nothing to send.
    ///
    /// The public log only grows when the relay echoes the event back.
    pub fn send_public(&mut self, text: &str) -> Result<bool, SessionError> {
        if text.is_empty() {
            return Ok(false);
        }
        let username = self.username().ok_or(SessionError::NotJoined)?;
        let event = ChatEvent::public(username, text);

        self.channel.emit(Frame::new(Channel::Message, &event)?)?;
        self.draft.clear();
        Ok(true)
    }

    /// Sends `text` to `peer` and shows it in that conversation right away.
    pub fn send_private(&mut self, peer: &str, text: &str) -> Result<bool, SessionError> {
        if text.is_empty() {
            return Ok(false);
        }
        let username = self.username().ok_or(SessionError::NotJoined)?;
        if username == peer {
            debug!(peer, "not sending a private message to self");
            return Ok(false);
        }
        let event = ChatEvent::private(username, peer, text);

        self.channel
            .emit(Frame::new(Channel::PrivateMessage, &event)?)?;
        self.update(Update::SentPrivate(event));
        self.draft.clear();
        Ok(true)
    }

    pub fn submit_public(&mut self) -> Result<bool, SessionError> {
        let text = self.draft.clone();
        self.send_public(&text)
    }

    pub fn submit_private(&mut self, peer: &str) -> Result<bool, SessionError> {
        let text = self.draft.clone();
        self.send_private(peer, &text)
    }

    pub fn on_receive_public(&mut self, event: ChatEvent) -> Change {
        self.update(Update::Received {
            channel: Channel::Message,
            event,
        })
    }

    pub fn on_receive_private(&mut self, event: ChatEvent) -> Change {
        self.update(Update::Received {
            channel: Channel::PrivateMessage,
            event,
        })
    }

    /// Applies a frame delivered by the relay.
    pub fn receive(&mut self, frame: Frame) -> Change {
        match frame.event() {
            Ok(event) => self.update(Update::Received {
                channel: frame.channel,
                event,
            }),
            Err(err) => {
                warn!(channel = %frame.channel, error = %err, "skipping undecodable event");
                Change::Unchanged
            }
        }
    }

    fn update(&mut self, update: Update) -> Change {
        let (next, change) = {
            let current = self.snapshot.borrow();
            current.apply(self.username(), &update)
        };
        if change != Change::Unchanged {
            self.snapshot.send_replace(Arc::new(next));
        }
        change
    }
}
