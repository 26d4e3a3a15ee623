//! The session task.
//!
//! One task owns the connection, the subscriptions, the dispatcher and the
//! transport stream. Handles talk to it through [`SessionCommand`]s; every
//! state transition and every event happens here, in one `select!` loop.

use std::future::pending;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};

use super::connection::{ConnectWaiter, Connection, KeepAliveAction, KeepAliveConfig};
use super::dispatcher::{Dispatcher, Inbound, Pending, ReplyError};
use super::subscriptions::{SubscribeWaiter, SubscriptionKey, Subscriptions};
use super::types::{MessageStore, MessageStoreItem, ReplySender, ServerContext, State};
use crate::codec::{decode_frames, encode_frames};
use crate::config::{Config, Protocol, ReconnectStrategy};
use crate::errors::{
    AuthError, ClientError, ClientErrorCode, ConnectError, ConnectFailed, DisconnectErrorCode,
    Error, StreamError, SubscribeError,
};
use crate::events::{
    ClientEvent, DisconnectedEvent, Listener, Observers, SubscriptionEvent, connecting_codes,
    unsubscribed_codes,
};
use crate::protocol::{
    Command, ConnectRequest, ConnectResult, PingRequest, PublishRequest, Push, PushData,
    RawCommand, RawReply, Reply, Unsubscribe, UnsubscribeRequest,
};
use crate::subscription::{State as SubscriptionState, SubscriptionShared};
use crate::transport::{Frame, Transport, TransportStream};

pub(crate) enum SessionCommand {
    Connect(ConnectWaiter),
    Disconnect(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
    SetToken(String),
    Publish {
        request: PublishRequest,
        reply: ReplySender,
        deadline: Instant,
    },
    Listen(Listener<ClientEvent>),
    AddSubscription {
        shared: Arc<SubscriptionShared>,
        state_tx: watch::Sender<SubscriptionState>,
    },
    RemoveSubscription(u64),
    Subscribe {
        handle: u64,
        reply: SubscribeWaiter,
    },
    Unsubscribe {
        handle: u64,
        reply: oneshot::Sender<()>,
    },
    ListenSubscription {
        handle: u64,
        listener: Listener<SubscriptionEvent>,
    },
}

enum Step {
    Command(Option<SessionCommand>),
    Frame(Option<Result<Frame, StreamError>>),
    Dialed(Result<TransportStream, ConnectError>),
    HandshakeTimeout,
    KeepAlive,
    Reconnect,
}

type Dial = BoxFuture<'static, Result<TransportStream, ConnectError>>;

pub(crate) struct Session {
    url: String,
    transport: Arc<dyn Transport>,
    protocol: Protocol,
    name: String,
    version: String,
    read_timeout: Duration,
    keepalive: KeepAliveConfig,
    reconnect_strategy: Arc<dyn ReconnectStrategy>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    observers: Observers<ClientEvent>,
    conn: Connection,
    subs: Subscriptions,
    dispatcher: Dispatcher,
    publishes: MessageStore,
    stream: Option<TransportStream>,
    dial: Option<Dial>,
}

impl Session {
    pub fn new(
        url: String,
        config: Config,
        transport: Arc<dyn Transport>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
        state_tx: watch::Sender<State>,
        server_tx: watch::Sender<Option<ServerContext>>,
    ) -> Self {
        let keepalive = KeepAliveConfig::from(&config);
        Self {
            url,
            transport,
            protocol: config.protocol,
            name: config.name,
            version: config.version,
            read_timeout: config.read_timeout,
            keepalive,
            reconnect_strategy: config.reconnect_strategy,
            commands,
            observers: Observers::new(),
            conn: Connection::new(config.token, state_tx, server_tx),
            subs: Subscriptions::new(),
            dispatcher: Dispatcher::new(),
            publishes: MessageStore::new(),
            stream: None,
            dial: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.next_step().await {
                Step::Command(Some(command)) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Step::Command(None) => {
                    log::debug!("all client handles dropped");
                    self.shutdown().await;
                    break;
                }
                Step::Frame(Some(Ok(frame))) => self.handle_frame(frame).await,
                Step::Frame(Some(Err(err))) => {
                    log::debug!("transport error: {}", err);
                    self.emit(ClientEvent::Error(err.into()));
                    self.connection_lost(
                        DisconnectErrorCode::CONNECTION_CLOSED,
                        "transport closed".into(),
                    );
                }
                Step::Frame(None) => {
                    self.connection_lost(
                        DisconnectErrorCode::CONNECTION_CLOSED,
                        "connection closed".into(),
                    );
                }
                Step::Dialed(result) => {
                    self.dial = None;
                    self.handle_dialed(result).await;
                }
                Step::HandshakeTimeout => self.connect_failed(ConnectError::Timeout),
                Step::KeepAlive => self.handle_keepalive().await,
                Step::Reconnect => self.start_attempt(),
            }
        }
        log::debug!("session finished");
    }

    async fn next_step(&mut self) -> Step {
        let handshake = self.conn.handshake_deadline;
        let keepalive = self.conn.keepalive_deadline();
        let reconnect = self.conn.reconnect_at;

        tokio::select! {
            biased;

            command = self.commands.recv() => Step::Command(command),
            frame = next_frame(&mut self.stream) => Step::Frame(frame),
            result = next_dial(&mut self.dial) => Step::Dialed(result),
            _ = sleep_until(handshake) => Step::HandshakeTimeout,
            _ = sleep_until(keepalive) => Step::KeepAlive,
            _ = sleep_until(reconnect) => Step::Reconnect,
        }
    }

    fn emit(&mut self, event: ClientEvent) {
        if let ClientEvent::Error(ref err) = event {
            log::debug!("client error: {}", err);
        }
        self.observers.notify(&event);
    }

    async fn handle_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Connect(reply) => self.handle_connect(reply),
            SessionCommand::Disconnect(reply) => {
                self.handle_disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::Close(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            SessionCommand::SetToken(token) => {
                self.conn.token = token;
                self.conn.stale_token = false;
            }
            SessionCommand::Publish {
                request,
                reply,
                deadline,
            } => self.handle_publish(request, reply, deadline).await,
            SessionCommand::Listen(listener) => self.observers.add(listener),
            SessionCommand::AddSubscription { shared, state_tx } => {
                self.subs.insert(shared, state_tx);
            }
            SessionCommand::RemoveSubscription(handle) => {
                self.handle_unsubscribe(handle).await;
                self.subs.remove(handle);
            }
            SessionCommand::Subscribe { handle, reply } => {
                self.handle_subscribe(handle, reply).await;
            }
            SessionCommand::Unsubscribe { handle, reply } => {
                self.handle_unsubscribe(handle).await;
                let _ = reply.send(());
            }
            SessionCommand::ListenSubscription { handle, listener } => {
                if let Some(key) = self.subs.key_of(handle) {
                    self.subs.listen(key, listener);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_connect(&mut self, reply: ConnectWaiter) {
        match self.conn.state() {
            State::Connected => {
                let _ = reply.send(Ok(()));
            }
            State::Connecting | State::Reconnecting => self.conn.add_waiter(reply),
            State::Disconnected if self.conn.stale_token => {
                let _ = reply.send(Err(AuthError::StaleToken.into()));
            }
            State::Disconnected => {
                self.conn.add_waiter(reply);
                self.conn.attempt = 0;
                self.conn
                    .set_reason(connecting_codes::CONNECT_CALLED, "connect called");
                self.start_attempt();
            }
            State::Closed => {
                let _ = reply.send(Err(ConnectFailed::Closed));
            }
        }
    }

    async fn handle_disconnect(&mut self) {
        let was = self.conn.state();
        if matches!(was, State::Disconnected | State::Closed) {
            return;
        }

        self.close_transport().await;
        self.conn.set_state(State::Disconnected);
        self.emit(ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::DISCONNECT_CALLED,
            reason: "disconnect called".into(),
            reconnect: false,
        }));
        self.conn.settle(Err(ConnectFailed::Cancelled));
        self.subs.transport_lost();
    }

    /// Terminal teardown, the session exits afterwards.
    async fn shutdown(&mut self) {
        let was = self.conn.state();
        if was == State::Closed {
            return;
        }

        self.close_transport().await;
        self.conn.set_state(State::Closed);
        if was != State::Disconnected {
            self.emit(ClientEvent::Disconnected(DisconnectedEvent {
                code: DisconnectErrorCode::DISCONNECT_CALLED,
                reason: "client closed".into(),
                reconnect: false,
            }));
        }
        self.subs.close_all();
        self.publishes.fail_all(ReplyError::Closed);
        self.conn.settle(Err(ConnectFailed::Closed));
    }

    fn start_attempt(&mut self) {
        let event = self.conn.start_attempt(Instant::now() + self.read_timeout);
        self.emit(ClientEvent::Connecting(event));
        self.dial = Some(self.transport.connect(&self.url));
    }

    fn schedule_reconnect(&mut self, code: u32, reason: &str) {
        let attempt = self.conn.attempt.max(1);
        let delay = self.reconnect_strategy.time_before_next_attempt(attempt);
        log::debug!("reconnecting attempt {}, delay={:?}", attempt, delay);
        self.conn.set_reason(code, reason);
        self.conn.schedule_reconnect(Instant::now() + delay);
    }

    async fn handle_dialed(&mut self, result: Result<TransportStream, ConnectError>) {
        let stream = match result {
            Ok(stream) => stream,
            Err(err) => return self.connect_failed(err),
        };
        if self.conn.state() != State::Connecting {
            return;
        }

        self.stream = Some(stream);
        let request = ConnectRequest {
            token: self.conn.token.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            ..Default::default()
        };
        let id = self.dispatcher.register(Pending::Connect);
        self.write(vec![raw_command(id, Command::Connect(request))])
            .await;
    }

    /// Attempt failed before the handshake completed.
    fn connect_failed(&mut self, err: ConnectError) {
        self.drop_transport();
        let reconnect = err.should_reconnect();
        self.emit(ClientEvent::Error(err.clone().into()));

        if reconnect {
            self.schedule_reconnect(connecting_codes::TRANSPORT_CLOSED, "transport closed");
        } else {
            self.conn.set_state(State::Disconnected);
            self.emit(ClientEvent::Disconnected(DisconnectedEvent {
                code: DisconnectErrorCode::CONNECTION_CLOSED,
                reason: err.to_string(),
                reconnect: false,
            }));
            self.conn.settle(Err(ConnectFailed::Terminal(err)));
            self.subs.transport_lost();
        }
    }

    /// Connect reply carried an authentication error.
    fn auth_failed(&mut self, err: ClientError) {
        self.drop_transport();
        self.conn.stale_token = true;
        let auth = AuthError::Rejected(err.clone());
        self.emit(ClientEvent::Error(auth.clone().into()));

        self.conn.set_state(State::Disconnected);
        self.emit(ClientEvent::Disconnected(DisconnectedEvent {
            code: DisconnectErrorCode::INVALID_TOKEN,
            reason: err.message,
            reconnect: false,
        }));
        self.conn.settle(Err(auth.into()));
        self.subs.transport_lost();
    }

    /// An open transport went away: closed by the peer, broken, or given up
    /// on by the keep-alive watchdog.
    fn connection_lost(&mut self, code: DisconnectErrorCode, reason: String) {
        self.drop_transport();
        let was = self.conn.state();
        if !matches!(was, State::Connecting | State::Connected) {
            return;
        }
        log::debug!("connection lost, code={}, reason={}", code.0, reason);

        let auth = code.is_auth_failure();
        let reconnect = code.should_reconnect() && !auth;
        let auth_err = AuthError::Disconnected {
            code,
            reason: reason.clone(),
        };
        if auth {
            self.conn.stale_token = true;
            self.emit(ClientEvent::Error(auth_err.clone().into()));
        } else if was == State::Connecting {
            let err = ConnectError::Handshake(reason.clone());
            self.emit(ClientEvent::Error(err.into()));
        }

        if was == State::Connected || !reconnect {
            self.emit(ClientEvent::Disconnected(DisconnectedEvent {
                code,
                reason: reason.clone(),
                reconnect,
            }));
        }

        if reconnect {
            let connecting_code = match code {
                DisconnectErrorCode::NO_PONG => connecting_codes::NO_PING,
                DisconnectErrorCode::CONNECTION_CLOSED => connecting_codes::TRANSPORT_CLOSED,
                code => code.0.into(),
            };
            self.schedule_reconnect(connecting_code, &reason);
        } else {
            self.conn.set_state(State::Disconnected);
            let failure = if auth {
                ConnectFailed::Auth(auth_err)
            } else {
                ConnectFailed::Disconnected { code, reason }
            };
            self.conn.settle(Err(failure));
        }
        self.subs.transport_lost();
    }

    /// Forgets the transport and everything tied to it.
    fn drop_transport(&mut self) {
        self.stream = None;
        self.dial = None;
        self.dispatcher.fail_all();
        self.conn.stop_timers();
    }

    async fn close_transport(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
        }
        self.drop_transport();
    }

    async fn write(&mut self, commands: Vec<RawCommand>) {
        if commands.is_empty() {
            return;
        }

        let Some(stream) = self.stream.as_mut() else {
            for command in &commands {
                if let Some(Pending::Publish(reply)) = self.dispatcher.cancel(command.id) {
                    let _ = reply.send(Err(ReplyError::Closed));
                }
            }
            return;
        };

        let mut failed = Vec::new();
        let frame = encode_frames(&commands, self.protocol, |idx| failed.push(idx));
        for idx in failed {
            let Some(command) = commands.get(idx) else {
                continue;
            };
            match self.dispatcher.cancel(command.id) {
                Some(Pending::Publish(reply)) => {
                    let _ = reply.send(Err(ReplyError::InappropriateProtocol));
                }
                Some(Pending::Subscribe(key)) => {
                    self.subs.rejected(
                        key,
                        ClientErrorCode::BadRequest.as_u32(),
                        "unable to encode subscribe request".into(),
                    );
                }
                _ => {}
            }
        }

        let Some(frame) = frame else {
            return;
        };
        if let Err(err) = stream.send(frame).await {
            self.emit(ClientEvent::Error(err.into()));
            self.connection_lost(DisconnectErrorCode::WRITE_ERROR, "write error".into());
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let data = match frame {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(data) => data,
            Frame::Close(close_frame) => {
                let (code, reason) = match close_frame {
                    Some(frame) => (DisconnectErrorCode(frame.code), frame.reason),
                    None => (DisconnectErrorCode::CONNECTION_CLOSED, "connection closed".into()),
                };
                log::debug!("connection closed by remote, code={}, reason={}", code.0, reason);
                return self.connection_lost(code, reason);
            }
        };

        let mut frames = Vec::new();
        let _ = decode_frames::<RawReply>(&data, self.protocol, |frame| {
            frames.push(frame);
            Ok(())
        });

        for frame in frames {
            if self.stream.is_none() {
                break;
            }
            match frame {
                Ok(raw) => self.handle_reply(raw).await,
                Err(err) => {
                    let err = StreamError::Decode(err.to_string());
                    self.emit(ClientEvent::Error(err.into()));
                    self.connection_lost(
                        DisconnectErrorCode::CONNECTION_CLOSED,
                        "bad protocol".into(),
                    );
                }
            }
        }
    }

    async fn handle_reply(&mut self, raw: RawReply) {
        match self.dispatcher.route(raw) {
            Inbound::ServerPing => {
                if self.conn.server_ping(Instant::now()) {
                    self.write(vec![RawCommand::from(Command::Empty)]).await;
                }
            }
            Inbound::Push(push) => self.handle_push(push).await,
            Inbound::Reply { id, pending, reply } => match pending {
                Pending::Connect => self.handle_connect_reply(reply).await,
                Pending::Ping => {
                    if let Reply::Error(err) = reply {
                        log::debug!("ping failed: {} {}", err.code, err.message);
                    }
                    self.conn.pong_received(Instant::now());
                }
                Pending::Subscribe(key) => self.handle_subscribe_reply(id, key, reply),
                Pending::Unsubscribe(channel) => {
                    if let Reply::Error(err) = reply {
                        log::debug!("unsubscribe from {} failed: {}", channel, err.message);
                    }
                }
                Pending::Publish(sender) => {
                    let _ = sender.send(Ok(reply));
                }
            },
            Inbound::Unknown { id } => log::debug!("unknown reply id={}", id),
        }
    }

    async fn handle_connect_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Connect(result) => self.on_connected(result).await,
            Reply::Error(err) => {
                let err = ClientError::from(err);
                if err.code.is_auth_failure() {
                    self.auth_failed(err);
                } else {
                    self.connect_failed(ConnectError::Rejected(err));
                }
            }
            reply => {
                let err = ConnectError::Handshake(format!("unexpected reply: {:?}", reply));
                self.connect_failed(err);
            }
        }
    }

    async fn on_connected(&mut self, result: ConnectResult) {
        let event = self
            .conn
            .connected(&result, &self.keepalive, Instant::now());
        self.emit(ClientEvent::Connected(event));
        self.conn.settle(Ok(()));

        let now = Instant::now();
        let mut commands = Vec::new();
        for key in self.subs.to_send() {
            if let Some(command) = self.subscribe_command(key) {
                commands.push(command);
            }
        }
        if !self.publishes.is_empty() {
            log::debug!("flushing {} queued publishes", self.publishes.len());
        }
        while let Some(item) = self.publishes.get_next(now) {
            let id = self.dispatcher.register(Pending::Publish(item.reply));
            commands.push(raw_command(id, Command::Publish(item.command)));
        }
        self.write(commands).await;
    }

    fn subscribe_command(&mut self, key: SubscriptionKey) -> Option<RawCommand> {
        let request = self.subs.subscribe_request(key)?;
        let id = self.dispatcher.register(Pending::Subscribe(key));
        self.subs.mark_sent(key, id);
        Some(raw_command(id, Command::Subscribe(request)))
    }

    fn handle_subscribe_reply(&mut self, id: u32, key: SubscriptionKey, reply: Reply) {
        let current = self
            .subs
            .get(key)
            .is_some_and(|record| record.subscribe_id == Some(id));
        if !current {
            log::debug!("stale subscribe reply id={}", id);
            return;
        }

        match reply {
            Reply::Subscribe(result) => self.subs.subscribed(key, result),
            Reply::Error(err) => self.subs.rejected(key, err.code, err.message),
            reply => {
                log::debug!("unexpected subscribe reply: {:?}", reply);
                self.subs.rejected(
                    key,
                    ClientErrorCode::Internal.as_u32(),
                    "unexpected reply".into(),
                );
            }
        }
    }

    async fn handle_push(&mut self, push: Push) {
        let channel = push.channel;
        match push.data {
            PushData::Publication(publication) => self.subs.publication(&channel, publication),
            PushData::Join(join) => {
                if let Some(info) = join.info {
                    self.subs.join(&channel, info);
                }
            }
            PushData::Leave(leave) => {
                if let Some(info) = leave.info {
                    self.subs.leave(&channel, info);
                }
            }
            PushData::Unsubscribe(unsubscribe) => {
                self.handle_server_unsubscribe(&channel, unsubscribe).await;
            }
            PushData::Disconnect(disconnect) => {
                let code = DisconnectErrorCode::from(disconnect.code);
                self.connection_lost(code, disconnect.reason);
            }
            PushData::Empty => log::debug!("empty push, channel={}", channel),
        }
    }

    async fn handle_server_unsubscribe(&mut self, channel: &str, unsubscribe: Unsubscribe) {
        let Some(key) = self.subs.live_key(channel) else {
            log::debug!("unsubscribe push for unknown channel {}", channel);
            return;
        };

        if unsubscribe.code < 2500 {
            self.subs.unsubscribe(
                key,
                unsubscribe.code,
                &unsubscribe.reason,
                SubscribeError::Unsubscribed,
            );
        } else {
            self.subs.resubscribe(key, unsubscribe.code, &unsubscribe.reason);
            if self.conn.state() == State::Connected {
                let command = self.subscribe_command(key);
                self.write(command.into_iter().collect()).await;
            }
        }
    }

    async fn handle_keepalive(&mut self) {
        let now = Instant::now();
        match self.conn.keepalive_due(now) {
            KeepAliveAction::Nothing => {}
            KeepAliveAction::SendPing => {
                let id = self.dispatcher.register(Pending::Ping);
                self.conn.ping_sent(now);
                self.write(vec![raw_command(id, Command::Ping(PingRequest {}))])
                    .await;
            }
            KeepAliveAction::Timeout => {
                self.emit(ClientEvent::Error(Error::Stream(StreamError::KeepAliveTimeout)));
                self.connection_lost(DisconnectErrorCode::NO_PONG, "no ping".into());
            }
        }
    }

    async fn handle_publish(
        &mut self,
        request: PublishRequest,
        reply: ReplySender,
        deadline: Instant,
    ) {
        let now = Instant::now();
        if deadline <= now {
            let _ = reply.send(Err(ReplyError::Timeout));
            return;
        }

        if self.conn.state() == State::Connected {
            let id = self.dispatcher.register(Pending::Publish(reply));
            self.write(vec![raw_command(id, Command::Publish(request))])
                .await;
        } else {
            let item = MessageStoreItem {
                command: request,
                reply,
                deadline,
            };
            self.publishes.push(item, now);
        }
    }

    async fn handle_subscribe(&mut self, handle: u64, reply: SubscribeWaiter) {
        let Some(key) = self.subs.key_of(handle) else {
            let _ = reply.send(Err(SubscribeError::Closed));
            return;
        };
        if let Err(err) = self.subs.begin(key, Some(reply)) {
            log::debug!("{}", err);
            return;
        }

        if self.conn.state() == State::Connected {
            let command = self.subscribe_command(key);
            self.write(command.into_iter().collect()).await;
        }
    }

    async fn handle_unsubscribe(&mut self, handle: u64) {
        let Some(key) = self.subs.key_of(handle) else {
            return;
        };
        let Some(channel) = self.subs.get(key).map(|r| r.shared.channel.clone()) else {
            return;
        };

        let on_wire = self.subs.unsubscribe(
            key,
            unsubscribed_codes::UNSUBSCRIBE_CALLED,
            "unsubscribe called",
            SubscribeError::Unsubscribed,
        );
        if on_wire && self.conn.state() == State::Connected {
            let id = self.dispatcher.register(Pending::Unsubscribe(channel.clone()));
            let request = UnsubscribeRequest { channel };
            self.write(vec![raw_command(id, Command::Unsubscribe(request))])
                .await;
        }
    }
}

fn raw_command(id: u32, command: Command) -> RawCommand {
    let mut raw = RawCommand::from(command);
    raw.id = id;
    raw
}

async fn next_frame(stream: &mut Option<TransportStream>) -> Option<Result<Frame, StreamError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn next_dial(dial: &mut Option<Dial>) -> Result<TransportStream, ConnectError> {
    match dial {
        Some(dial) => dial.await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => pending().await,
    }
}
