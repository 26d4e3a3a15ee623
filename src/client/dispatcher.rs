//! Request/reply correlation and routing of inbound frames.

use std::collections::HashMap;

use thiserror::Error;

use super::subscriptions::SubscriptionKey;
use super::types::ReplySender;
use crate::protocol::{Push, RawReply, Reply};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("inappropriate protocol")]
    InappropriateProtocol,
}

/// What an outstanding request id was issued for.
pub(crate) enum Pending {
    Connect,
    Ping,
    Subscribe(SubscriptionKey),
    Unsubscribe(String),
    Publish(ReplySender),
}

/// A decoded inbound frame, matched against outstanding requests.
pub(crate) enum Inbound {
    /// Empty frame with no id.
    ServerPing,
    Reply {
        id: u32,
        pending: Pending,
        reply: Reply,
    },
    Push(Push),
    Unknown {
        id: u32,
    },
}

pub(crate) struct Dispatcher {
    next_id: u32,
    pending: HashMap<u32, Pending>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates a non-zero id not used by any outstanding request.
    pub fn register(&mut self, pending: Pending) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.pending.contains_key(&id) {
                self.pending.insert(id, pending);
                return id;
            }
        }
    }

    pub fn cancel(&mut self, id: u32) -> Option<Pending> {
        self.pending.remove(&id)
    }

    pub fn route(&mut self, raw: RawReply) -> Inbound {
        let id = raw.id;
        let reply = Reply::from(raw);

        if id == 0 {
            return match reply {
                Reply::Empty => Inbound::ServerPing,
                Reply::Push(push) => Inbound::Push(push),
                reply => {
                    log::debug!("reply without id: {:?}", reply);
                    Inbound::Unknown { id }
                }
            };
        }

        match self.pending.remove(&id) {
            Some(pending) => Inbound::Reply { id, pending, reply },
            None => Inbound::Unknown { id },
        }
    }

    /// Forgets every outstanding request; waiting publishers get `Closed`.
    pub fn fail_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let Pending::Publish(reply) = pending {
                let _ = reply.send(Err(ReplyError::Closed));
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
