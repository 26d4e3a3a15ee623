//! Channel subscription handles.
//!
//! A [`Subscription`] is a back-reference into the session: the state
//! machine, the recovery position and the observers live in the session
//! task. Handles send commands and read a state snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use centrifuge_session::client::Client;
//! use centrifuge_session::config::Config;
//!
//! # async fn run() {
//! let client = Client::new("ws://localhost:8000/connection/websocket", Config::new());
//! let sub = client.new_subscription("news");
//! sub.on_publication(|event| {
//!     println!("{}: {}", event.channel, String::from_utf8_lossy(&event.data));
//! });
//! client.connect();
//! if let Err(err) = sub.subscribe().await {
//!     eprintln!("subscribe failed: {err}");
//! }
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::client::session::SessionCommand;
use crate::client::{FutureResult, RequestError, publish_request};
use crate::config::SubscriptionConfig;
use crate::errors::SubscribeError;
use crate::events::{
    EventStream, JoinEvent, LeaveEvent, Listener, PublicationEvent, SubscribeErrorEvent,
    SubscribedEvent, SubscribingEvent, SubscriptionEvent, UnsubscribedEvent,
};
use crate::protocol::PublishRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable part of a subscription, shared by the handle and the session.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    pub(crate) id: u64,
    pub(crate) channel: String,
    pub(crate) config: SubscriptionConfig,
    state: watch::Receiver<State>,
}

impl SubscriptionShared {
    pub fn new(
        channel: impl Into<String>,
        config: SubscriptionConfig,
    ) -> (Arc<Self>, watch::Sender<State>) {
        let (state_tx, state) = watch::channel(State::Unsubscribed);
        let shared = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            channel: channel.into(),
            config,
            state,
        });
        (shared, state_tx)
    }
}

/// Handle to one channel subscription of a [`Client`](crate::client::Client).
///
/// Clones refer to the same subscription. A handle does not keep the client
/// alive; once the session is gone every operation resolves as closed.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    commands: mpsc::WeakUnboundedSender<SessionCommand>,
    read_timeout: Duration,
}

impl Subscription {
    pub(crate) fn new(
        shared: Arc<SubscriptionShared>,
        commands: mpsc::WeakUnboundedSender<SessionCommand>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            commands,
            read_timeout,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    fn send(&self, command: SessionCommand) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(command);
        }
    }

    /// Starts subscribing to the channel.
    ///
    /// Resolves once the server acknowledged the subscription. Fails with
    /// [`SubscribeError::Duplicate`] when a subscription to the channel is
    /// already live on this client, this one included. There is no timeout:
    /// while the client is not connected the request waits for the next
    /// connection.
    pub fn subscribe(
        &self,
    ) -> FutureResult<impl Future<Output = Result<(), SubscribeError>> + use<>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe {
            handle: self.id(),
            reply: tx,
        });
        FutureResult(async move { rx.await.unwrap_or(Err(SubscribeError::Closed)) })
    }

    /// Leaves the channel. Does nothing unless subscribing or subscribed.
    pub fn unsubscribe(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Unsubscribe {
            handle: self.id(),
            reply: tx,
        });
        FutureResult(async {
            let _ = rx.await;
        })
    }

    /// Publishes `data` into the channel.
    pub fn publish(
        &self,
        data: Vec<u8>,
    ) -> FutureResult<impl Future<Output = Result<(), RequestError>> + use<>> {
        let request = PublishRequest {
            channel: self.shared.channel.clone(),
            data,
        };
        FutureResult(publish_request(
            self.commands.upgrade(),
            request,
            self.read_timeout,
        ))
    }

    /// Registers a callback for every event of this subscription.
    ///
    /// Callbacks run on the session task, in registration order; they must
    /// not block.
    pub fn on_event(&self, func: impl FnMut(&SubscriptionEvent) + Send + 'static) {
        self.send(SessionCommand::ListenSubscription {
            handle: self.id(),
            listener: Listener::Callback(Box::new(func)),
        });
    }

    /// Returns a stream of every event of this subscription from now on.
    pub fn events(&self) -> EventStream<SubscriptionEvent> {
        let (tx, stream) = EventStream::channel();
        self.send(SessionCommand::ListenSubscription {
            handle: self.id(),
            listener: Listener::Channel(tx),
        });
        stream
    }

    fn on_variant<T: 'static>(
        &self,
        mut func: impl FnMut(&T) + Send + 'static,
        select: fn(&SubscriptionEvent) -> Option<&T>,
    ) {
        self.on_event(move |event| {
            if let Some(event) = select(event) {
                func(event);
            }
        });
    }

    pub fn on_subscribing(&self, func: impl FnMut(&SubscribingEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Subscribing(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_subscribed(&self, func: impl FnMut(&SubscribedEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Subscribed(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_subscribe_error(&self, func: impl FnMut(&SubscribeErrorEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::SubscribeError(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_unsubscribed(&self, func: impl FnMut(&UnsubscribedEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Unsubscribed(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_publication(&self, func: impl FnMut(&PublicationEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Publication(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_join(&self, func: impl FnMut(&JoinEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Join(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_leave(&self, func: impl FnMut(&LeaveEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            SubscriptionEvent::Leave(e) => Some(e),
            _ => None,
        });
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.shared.channel)
            .field("state", &self.state())
            .finish()
    }
}
