//! Typed events delivered to client and subscription observers.
//!
//! Observers are either callbacks, run on the session task in registration
//! order, or an [`EventStream`] fed through an unbounded channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::errors::{DisconnectErrorCode, Error};
use crate::protocol::ClientInfo;

/// Codes carried by client-side `connecting` events.
pub mod connecting_codes {
    pub const CONNECT_CALLED: u32 = 0;
    pub const TRANSPORT_CLOSED: u32 = 1;
    pub const NO_PING: u32 = 2;
}

/// Codes carried by client-side `subscribing` events.
pub mod subscribing_codes {
    pub const SUBSCRIBE_CALLED: u32 = 0;
    pub const TRANSPORT_CLOSED: u32 = 1;
}

/// Codes carried by client-side `unsubscribed` events.
pub mod unsubscribed_codes {
    pub const UNSUBSCRIBE_CALLED: u32 = 0;
    pub const CLIENT_CLOSED: u32 = 2;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connecting(ConnectingEvent),
    Connected(ConnectedEvent),
    Disconnected(DisconnectedEvent),
    Error(Error),
}

/// A connection attempt started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectingEvent {
    /// 1-based attempt number since the last successful handshake.
    pub attempt: u32,
    pub code: u32,
    pub reason: String,
}

/// The handshake completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedEvent {
    pub client_id: String,
    pub version: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedEvent {
    pub code: DisconnectErrorCode,
    pub reason: String,
    /// Whether the client will reconnect on its own.
    pub reconnect: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Subscribing(SubscribingEvent),
    Subscribed(SubscribedEvent),
    SubscribeError(SubscribeErrorEvent),
    Unsubscribed(UnsubscribedEvent),
    Publication(PublicationEvent),
    Join(JoinEvent),
    Leave(LeaveEvent),
}

impl SubscriptionEvent {
    pub fn channel(&self) -> &str {
        match self {
            SubscriptionEvent::Subscribing(e) => &e.channel,
            SubscriptionEvent::Subscribed(e) => &e.channel,
            SubscriptionEvent::SubscribeError(e) => &e.channel,
            SubscriptionEvent::Unsubscribed(e) => &e.channel,
            SubscriptionEvent::Publication(e) => &e.channel,
            SubscriptionEvent::Join(e) => &e.channel,
            SubscriptionEvent::Leave(e) => &e.channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribingEvent {
    pub channel: String,
    pub code: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedEvent {
    pub channel: String,
    /// Server kept a stream position for this subscription.
    pub recoverable: bool,
    /// Missed publications were recovered; they follow this event.
    pub recovered: bool,
    pub data: Vec<u8>,
}

/// The server rejected a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeErrorEvent {
    pub channel: String,
    pub code: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribedEvent {
    pub channel: String,
    pub code: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublicationEvent {
    pub channel: String,
    pub data: Vec<u8>,
    /// Stream offset, when the server tracks one for the channel.
    pub offset: Option<u64>,
    pub info: Option<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinEvent {
    pub channel: String,
    pub info: ClientInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveEvent {
    pub channel: String,
    pub info: ClientInfo,
}

pub(crate) type Callback<E> = Box<dyn FnMut(&E) + Send + 'static>;

pub(crate) enum Listener<E> {
    Callback(Callback<E>),
    Channel(mpsc::UnboundedSender<E>),
}

/// Registered observers of one event source.
pub(crate) struct Observers<E> {
    listeners: Vec<Listener<E>>,
}

impl<E: Clone> Observers<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: Listener<E>) {
        self.listeners.push(listener);
    }

    /// Delivers the event to every observer in registration order, dropping
    /// streams whose receiver is gone.
    pub fn notify(&mut self, event: &E) {
        self.listeners.retain_mut(|listener| match listener {
            Listener::Callback(func) => {
                func(event);
                true
            }
            Listener::Channel(tx) => tx.send(event.clone()).is_ok(),
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Stream of events from a client or a subscription.
///
/// Ends when the source is gone: the session closed, or the subscription was
/// removed from its client.
pub struct EventStream<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<E>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn observers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::<u32>::new();
        for tag in 0..3 {
            let seen = seen.clone();
            observers.add(Listener::Callback(Box::new(move |event| {
                seen.lock().unwrap().push((tag, *event));
            })));
        }

        observers.notify(&7);
        assert_eq!(*seen.lock().unwrap(), [(0, 7), (1, 7), (2, 7)]);
    }

    #[tokio::test]
    async fn dropped_streams_are_pruned() {
        let mut observers = Observers::<u32>::new();
        let (tx, mut stream) = EventStream::channel();
        observers.add(Listener::Channel(tx));
        let (tx, dropped) = EventStream::<u32>::channel();
        observers.add(Listener::Channel(tx));
        drop(dropped);

        observers.notify(&1);
        assert_eq!(observers.len(), 1);
        assert_eq!(stream.recv().await, Some(1));
    }
}
