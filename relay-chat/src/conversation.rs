//! Client-side conversation state.
//!
//! [`Conversations`] is a value: [`Conversations::apply`] never touches the
//! receiver and instead returns the next snapshot plus a [`Change`] describing
//! what happened, so a renderer holding an older snapshot keeps a stable view.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::event::{Channel, ChatEvent, Status};

/// Everything the store can be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// An event delivered by the relay on `channel`.
    Received { channel: Channel, event: ChatEvent },
    /// A private message this client just sent, appended before the relay echoes it.
    SentPrivate(ChatEvent),
}

/// Outcome of applying an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    PeerAdded(String),
    Public(ChatEvent),
    Private { peer: String, event: ChatEvent },
    /// The relay echoed back a private message that was already shown.
    Confirmed { peer: String },
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateLog {
    entries: Vec<ChatEvent>,
    unconfirmed: VecDeque<ChatEvent>,
}

impl PrivateLog {
    pub fn entries(&self) -> &[ChatEvent] {
        &self.entries
    }

    /// Number of own messages still waiting for their relay echo.
    pub fn unconfirmed(&self) -> usize {
        self.unconfirmed.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversations {
    public: Vec<ChatEvent>,
    private: BTreeMap<String, PrivateLog>,
}

impl Conversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_log(&self) -> &[ChatEvent] {
        &self.public
    }

    pub fn private_log(&self, peer: &str) -> Option<&PrivateLog> {
        self.private.get(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.private.keys().map(String::as_str)
    }

    /// Computes the snapshot that follows `update` for the user named `me`.
    ///
    /// `me` is `None` until the session has joined; private traffic cannot be
    /// attributed before then and is ignored.
    pub fn apply(&self, me: Option<&str>, update: &Update) -> (Self, Change) {
        let mut next = self.clone();
        let change = match update {
            Update::Received {
                channel: Channel::Message,
                event,
            } => next.receive_public(event),
            Update::Received {
                channel: Channel::PrivateMessage,
                event,
            } => match me {
                Some(me) => next.receive_private(me, event),
                None => Change::Unchanged,
            },
            Update::SentPrivate(event) => next.record_sent(event),
        };
        (next, change)
    }

    fn receive_public(&mut self, event: &ChatEvent) -> Change {
        match event.status {
            Status::Join => {
                if self.private.contains_key(&event.sender_name) {
                    return Change::Unchanged;
                }
                self.private
                    .insert(event.sender_name.clone(), PrivateLog::default());
                Change::PeerAdded(event.sender_name.clone())
            }
            Status::Message => {
                self.public.push(event.clone());
                Change::Public(event.clone())
            }
        }
    }

    fn receive_private(&mut self, me: &str, event: &ChatEvent) -> Change {
        if event.status != Status::Message {
            debug!(sender = %event.sender_name, "ignoring non-message private event");
            return Change::Unchanged;
        }
        let Some(peer) = event.counterpart(me) else {
            return Change::Unchanged;
        };

        let log = self.private.entry(peer.to_string()).or_default();
        if event.sender_name == me {
            let echoed = log.unconfirmed.iter().position(|sent| sent == event);
            if let Some(index) = echoed {
                // Older pending sends lost their echo for good.
                log.unconfirmed.drain(..=index);
                return Change::Confirmed {
                    peer: peer.to_string(),
                };
            }
        }

        log.entries.push(event.clone());
        Change::Private {
            peer: peer.to_string(),
            event: event.clone(),
        }
    }

    fn record_sent(&mut self, event: &ChatEvent) -> Change {
        let Some(peer) = event.receiver_name.as_deref() else {
            return Change::Unchanged;
        };

        let log = self.private.entry(peer.to_string()).or_default();
        log.entries.push(event.clone());
        log.unconfirmed.push_back(event.clone());
        Change::Private {
            peer: peer.to_string(),
            event: event.clone(),
        }
    }
}
