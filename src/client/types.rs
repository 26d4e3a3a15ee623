//! Client types and state management.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::client::dispatcher::ReplyError;
use crate::protocol::{ConnectResult, PublishRequest, Reply};

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not connected, and not trying to
    Disconnected,
    /// Transport or handshake in progress
    Connecting,
    /// Handshake completed
    Connected,
    /// Waiting for the backoff timer before the next attempt
    Reconnecting,
    /// `close()` was called; the client can no longer connect
    Closed,
}

/// What the server told us about the connection in its connect reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerContext {
    pub client_id: String,
    pub version: String,
    pub node: String,
    pub session: String,
    pub expires: bool,
    pub ttl: u32,
    /// Server ping interval in seconds, zero when the server does not ping.
    pub ping: u32,
    /// Whether server pings must be answered.
    pub pong: bool,
}

impl From<&ConnectResult> for ServerContext {
    fn from(result: &ConnectResult) -> Self {
        Self {
            client_id: result.client.clone(),
            version: result.version.clone(),
            node: result.node.clone(),
            session: result.session.clone(),
            expires: result.expires,
            ttl: result.ttl,
            ping: result.ping,
            pong: result.pong,
        }
    }
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, ReplyError>>;

/// A publish waiting for the connection.
pub(crate) struct MessageStoreItem {
    pub(crate) command: PublishRequest,
    pub(crate) reply: ReplySender,
    pub(crate) deadline: Instant,
}

impl MessageStoreItem {
    /// Returns `None` and fails the caller with a timeout once the deadline
    /// has passed.
    fn check_expiration(self, now: Instant) -> Option<Self> {
        if self.deadline > now {
            Some(self)
        } else {
            let _ = self.reply.send(Err(ReplyError::Timeout));
            None
        }
    }
}

/// Publishes made while not connected, flushed after the next handshake.
#[derive(Default)]
pub(crate) struct MessageStore {
    messages: VecDeque<MessageStoreItem>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: MessageStoreItem, now: Instant) {
        self.messages.push_back(item);
        while let Some(item) = self.messages.pop_front() {
            if let Some(item) = item.check_expiration(now) {
                self.messages.push_front(item);
                break;
            }
        }
    }

    /// Next message that has not expired yet.
    pub fn get_next(&mut self, now: Instant) -> Option<MessageStoreItem> {
        loop {
            let item = self.messages.pop_front()?;
            if let Some(item) = item.check_expiration(now) {
                return Some(item);
            }
        }
    }

    pub fn fail_all(&mut self, err: ReplyError) {
        for item in self.messages.drain(..) {
            let _ = item.reply.send(Err(err));
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
