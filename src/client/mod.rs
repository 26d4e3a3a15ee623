//! Client for Centrifugo servers.
//!
//! A [`Client`] owns one connection, managed by a background session task.
//! The handle only sends commands to that task and reads snapshots of its
//! state; everything else is observed through events.
//!
//! # Example
//!
//! ```rust,no_run
//! use centrifuge_session::client::{Client, State};
//! use centrifuge_session::config::Config;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new().use_json().with_token("your-auth-token");
//! let client = Client::new("ws://localhost:8000/connection/websocket", config);
//!
//! client.on_connected(|event| println!("connected as {}", event.client_id));
//! client.connect().await?;
//! assert_eq!(client.state(), State::Connected);
//!
//! let sub = client.new_subscription("news");
//! sub.subscribe().await?;
//!
//! client.publish("news", br#"{"text":"hello"}"#.to_vec()).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod dispatcher;
pub mod errors;
pub(crate) mod session;
mod subscriptions;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{Config, SubscriptionConfig};
use crate::errors::{ConnectFailed, Error};
use crate::events::{
    ClientEvent, ConnectedEvent, ConnectingEvent, DisconnectedEvent, EventStream, Listener,
};
use crate::protocol::{PublishRequest, Reply};
use crate::subscription::{Subscription, SubscriptionShared};
use crate::transport::Transport;
use crate::transport::websocket::WebSocketTransport;

pub use errors::{FutureResult, ReplyError, RequestError};
use session::{Session, SessionCommand};
pub use types::{ServerContext, State};

struct ClientShared {
    state: watch::Receiver<State>,
    server: watch::Receiver<Option<ServerContext>>,
    read_timeout: Duration,
}

/// Handle to a client session.
///
/// Cheap to clone; all clones drive the same connection. The session task
/// runs until [`close`](Client::close) is called or every `Client` handle
/// has been dropped.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<SessionCommand>,
    shared: Arc<ClientShared>,
}

impl Client {
    /// Creates a client connecting over WebSocket.
    ///
    /// Nothing happens on the network until [`connect`](Client::connect).
    ///
    /// # Panics
    ///
    /// Panics when `config` carries no runtime handle and this is called
    /// outside of a tokio runtime.
    pub fn new(url: &str, config: Config) -> Self {
        Self::with_transport(url, config, WebSocketTransport::new())
    }

    /// Creates a client on a custom transport.
    ///
    /// # Example
    ///
    /// ```rust
    /// use centrifuge_session::client::{Client, State};
    /// use centrifuge_session::config::Config;
    /// use centrifuge_session::transport::memory::MemoryTransport;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let (transport, _listener) = MemoryTransport::new();
    /// let client = Client::with_transport("memory://test", Config::new(), transport);
    /// assert_eq!(client.state(), State::Disconnected);
    /// # }
    /// ```
    pub fn with_transport(url: &str, config: Config, transport: impl Transport) -> Self {
        let rt = config
            .runtime
            .clone()
            .unwrap_or_else(tokio::runtime::Handle::current);
        let read_timeout = config.read_timeout;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(State::Disconnected);
        let (server_tx, server) = watch::channel(None);

        let session = Session::new(
            url.to_owned(),
            config,
            Arc::new(transport),
            commands_rx,
            state_tx,
            server_tx,
        );
        rt.spawn(session.run());

        Self {
            commands,
            shared: Arc::new(ClientShared {
                state,
                server,
                read_timeout,
            }),
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("session is gone");
        }
    }

    /// Starts connecting.
    ///
    /// Resolves with `Ok(())` once connected. While the client retries after
    /// transient failures the future keeps waiting; it fails only when the
    /// client gives up, is disconnected or closed.
    pub fn connect(&self) -> FutureResult<impl Future<Output = Result<(), ConnectFailed>> + use<>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Connect(tx));
        FutureResult(async move { rx.await.unwrap_or(Err(ConnectFailed::Closed)) })
    }

    /// Drops the connection and stops reconnecting.
    ///
    /// Subscriptions stay registered and are restored by the next
    /// [`connect`](Client::connect).
    pub fn disconnect(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Disconnect(tx));
        FutureResult(async {
            let _ = rx.await;
        })
    }

    /// Shuts the session down for good. Resolves once the session has torn
    /// down; the client cannot connect again afterwards.
    pub fn close(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Close(tx));
        FutureResult(async {
            let _ = rx.await;
        })
    }

    /// Same as [`connect`](Client::connect).
    pub fn start(&self) -> FutureResult<impl Future<Output = Result<(), ConnectFailed>> + use<>> {
        self.connect()
    }

    /// Same as [`close`](Client::close).
    pub fn stop(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        self.close()
    }

    /// Replaces the token sent by the next handshake.
    pub fn set_token(&self, token: impl Into<String>) {
        self.send(SessionCommand::SetToken(token.into()));
    }

    /// Publishes `data` into `channel` without subscribing to it.
    ///
    /// Made while not connected, the request waits for the next connection
    /// until the read timeout runs out.
    pub fn publish(
        &self,
        channel: &str,
        data: Vec<u8>,
    ) -> FutureResult<impl Future<Output = Result<(), RequestError>> + use<>> {
        let request = PublishRequest {
            channel: channel.into(),
            data,
        };
        FutureResult(publish_request(
            Some(self.commands.clone()),
            request,
            self.shared.read_timeout,
        ))
    }

    /// Creates a subscription to `channel` with default options.
    pub fn new_subscription(&self, channel: &str) -> Subscription {
        self.new_subscription_with(channel, SubscriptionConfig::default())
    }

    /// Creates a subscription to `channel`.
    ///
    /// Several handles may target one channel, but only one of them can be
    /// subscribed at a time.
    pub fn new_subscription_with(&self, channel: &str, config: SubscriptionConfig) -> Subscription {
        let (shared, state_tx) = SubscriptionShared::new(channel, config);
        self.send(SessionCommand::AddSubscription {
            shared: shared.clone(),
            state_tx,
        });
        Subscription::new(shared, self.commands.downgrade(), self.shared.read_timeout)
    }

    /// Unsubscribes and forgets the subscription. Its event streams end.
    pub fn remove_subscription(&self, subscription: &Subscription) {
        self.send(SessionCommand::RemoveSubscription(subscription.id()));
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    /// What the server reported in the last successful handshake.
    pub fn server_context(&self) -> Option<ServerContext> {
        self.shared.server.borrow().clone()
    }

    /// Registers a callback for every client event.
    ///
    /// Callbacks run on the session task, in registration order; they must
    /// not block.
    pub fn on_event(&self, func: impl FnMut(&ClientEvent) + Send + 'static) {
        self.send(SessionCommand::Listen(Listener::Callback(Box::new(func))));
    }

    /// Returns a stream of every client event from now on.
    pub fn events(&self) -> EventStream<ClientEvent> {
        let (tx, stream) = EventStream::channel();
        self.send(SessionCommand::Listen(Listener::Channel(tx)));
        stream
    }

    fn on_variant<T: 'static>(
        &self,
        mut func: impl FnMut(&T) + Send + 'static,
        select: fn(&ClientEvent) -> Option<&T>,
    ) {
        self.on_event(move |event| {
            if let Some(event) = select(event) {
                func(event);
            }
        });
    }

    pub fn on_connecting(&self, func: impl FnMut(&ConnectingEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            ClientEvent::Connecting(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_connected(&self, func: impl FnMut(&ConnectedEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            ClientEvent::Connected(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_disconnected(&self, func: impl FnMut(&DisconnectedEvent) + Send + 'static) {
        self.on_variant(func, |event| match event {
            ClientEvent::Disconnected(e) => Some(e),
            _ => None,
        });
    }

    pub fn on_error(&self, func: impl FnMut(&Error) + Send + 'static) {
        self.on_variant(func, |event| match event {
            ClientEvent::Error(e) => Some(e),
            _ => None,
        });
    }
}

/// Hands a publish to the session and waits for the reply, at most
/// `read_timeout`.
pub(crate) fn publish_request(
    commands: Option<mpsc::UnboundedSender<SessionCommand>>,
    request: PublishRequest,
    read_timeout: Duration,
) -> impl Future<Output = Result<(), RequestError>> {
    let deadline = Instant::now() + read_timeout;
    let (tx, rx) = oneshot::channel();
    match commands {
        Some(commands) => {
            let _ = commands.send(SessionCommand::Publish {
                request,
                reply: tx,
                deadline,
            });
        }
        None => {
            let _ = tx.send(Err(ReplyError::Closed));
        }
    }

    async move {
        let result = tokio::time::timeout_at(deadline.into(), rx).await;
        match result {
            Ok(Ok(Ok(Reply::Publish(_)))) => Ok(()),
            Ok(Ok(Ok(Reply::Error(err)))) => Err(RequestError::ErrorResponse(err.into())),
            Ok(Ok(Ok(reply))) => Err(RequestError::UnexpectedReply(reply)),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(err)) => Err(err.into()),
            Err(err) => Err(err.into()),
        }
    }
}
