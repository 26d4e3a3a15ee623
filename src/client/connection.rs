//! Connection state machine bookkeeping.
//!
//! Holds the state, the timers and the waiters of one client connection. It
//! performs no I/O: the session drives the transport and calls in here on
//! every transition.

use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};

use super::types::{ServerContext, State};
use crate::config::Config;
use crate::errors::ConnectFailed;
use crate::events::{ConnectedEvent, ConnectingEvent};
use crate::protocol::ConnectResult;

pub(crate) type ConnectWaiter = oneshot::Sender<Result<(), ConnectFailed>>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeepAliveConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_server_ping_delay: Duration,
}

impl From<&Config> for KeepAliveConfig {
    fn from(config: &Config) -> Self {
        Self {
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
            max_server_ping_delay: config.max_server_ping_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepAlive {
    Off,
    /// Server pings us; it must do so before `deadline`.
    Server {
        deadline: Instant,
        window: Duration,
        pong: bool,
    },
    /// We ping the server.
    Client {
        next_ping: Instant,
        pong_deadline: Option<Instant>,
        interval: Duration,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepAliveAction {
    Nothing,
    SendPing,
    Timeout,
}

pub(crate) struct Connection {
    state: State,
    state_tx: watch::Sender<State>,
    server_tx: watch::Sender<Option<ServerContext>>,
    pub(crate) token: String,
    /// The server refused `token`; it must be replaced before connecting.
    pub(crate) stale_token: bool,
    /// Attempts since the last successful handshake.
    pub(crate) attempt: u32,
    pub(crate) reconnect_at: Option<Instant>,
    pub(crate) handshake_deadline: Option<Instant>,
    keepalive: KeepAlive,
    waiters: Vec<ConnectWaiter>,
    next_code: u32,
    next_reason: String,
}

impl Connection {
    pub fn new(
        token: String,
        state_tx: watch::Sender<State>,
        server_tx: watch::Sender<Option<ServerContext>>,
    ) -> Self {
        Self {
            state: State::Disconnected,
            state_tx,
            server_tx,
            token,
            stale_token: false,
            attempt: 0,
            reconnect_at: None,
            handshake_deadline: None,
            keepalive: KeepAlive::Off,
            waiters: Vec::new(),
            next_code: 0,
            next_reason: String::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        log::debug!("state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
    }

    pub fn add_waiter(&mut self, waiter: ConnectWaiter) {
        self.waiters.push(waiter);
    }

    pub fn settle(&mut self, result: Result<(), ConnectFailed>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    /// Code and reason reported by the next `connecting` event.
    pub fn set_reason(&mut self, code: u32, reason: impl Into<String>) {
        self.next_code = code;
        self.next_reason = reason.into();
    }

    pub fn start_attempt(&mut self, handshake_deadline: Instant) -> ConnectingEvent {
        self.attempt = self.attempt.saturating_add(1);
        self.reconnect_at = None;
        self.handshake_deadline = Some(handshake_deadline);
        self.set_state(State::Connecting);
        ConnectingEvent {
            attempt: self.attempt,
            code: self.next_code,
            reason: self.next_reason.clone(),
        }
    }

    pub fn schedule_reconnect(&mut self, at: Instant) {
        self.stop_timers();
        self.reconnect_at = Some(at);
        self.set_state(State::Reconnecting);
    }

    pub fn connected(
        &mut self,
        result: &ConnectResult,
        config: &KeepAliveConfig,
        now: Instant,
    ) -> ConnectedEvent {
        self.attempt = 0;
        self.handshake_deadline = None;
        self.reconnect_at = None;

        self.keepalive = if result.ping > 0 {
            let window = Duration::from_secs(result.ping.into()) + config.max_server_ping_delay;
            KeepAlive::Server {
                deadline: now + window,
                window,
                pong: result.pong,
            }
        } else if config.ping_interval > Duration::ZERO {
            KeepAlive::Client {
                next_ping: now + config.ping_interval,
                pong_deadline: None,
                interval: config.ping_interval,
                timeout: config.pong_timeout,
            }
        } else {
            KeepAlive::Off
        };

        self.server_tx.send_replace(Some(ServerContext::from(result)));
        self.set_state(State::Connected);
        ConnectedEvent {
            client_id: result.client.clone(),
            version: result.version.clone(),
            data: result.data.clone(),
        }
    }

    pub fn stop_timers(&mut self) {
        self.reconnect_at = None;
        self.handshake_deadline = None;
        self.keepalive = KeepAlive::Off;
    }

    pub fn keepalive_deadline(&self) -> Option<Instant> {
        match self.keepalive {
            KeepAlive::Off => None,
            KeepAlive::Server { deadline, .. } => Some(deadline),
            KeepAlive::Client {
                next_ping,
                pong_deadline,
                ..
            } => Some(pong_deadline.unwrap_or(next_ping)),
        }
    }

    pub fn keepalive_due(&self, now: Instant) -> KeepAliveAction {
        match self.keepalive {
            KeepAlive::Off => KeepAliveAction::Nothing,
            KeepAlive::Server { deadline, .. } if now >= deadline => KeepAliveAction::Timeout,
            KeepAlive::Server { .. } => KeepAliveAction::Nothing,
            KeepAlive::Client {
                pong_deadline: Some(deadline),
                ..
            } if now >= deadline => KeepAliveAction::Timeout,
            KeepAlive::Client {
                pong_deadline: Some(_),
                ..
            } => KeepAliveAction::Nothing,
            KeepAlive::Client { next_ping, .. } if now >= next_ping => KeepAliveAction::SendPing,
            KeepAlive::Client { .. } => KeepAliveAction::Nothing,
        }
    }

    /// Returns whether the ping must be answered.
    pub fn server_ping(&mut self, now: Instant) -> bool {
        match &mut self.keepalive {
            KeepAlive::Server {
                deadline,
                window,
                pong,
            } => {
                *deadline = now + *window;
                *pong
            }
            _ => {
                log::debug!("unexpected server ping");
                false
            }
        }
    }

    pub fn ping_sent(&mut self, now: Instant) {
        if let KeepAlive::Client {
            pong_deadline,
            timeout,
            ..
        } = &mut self.keepalive
        {
            *pong_deadline = Some(now + *timeout);
        }
    }

    pub fn pong_received(&mut self, now: Instant) {
        if let KeepAlive::Client {
            next_ping,
            pong_deadline,
            interval,
            ..
        } = &mut self.keepalive
        {
            *pong_deadline = None;
            *next_ping = now + *interval;
        }
    }
}
