//! Scripted JSON server for driving a client over `MemoryTransport`.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::IntoFuture;
use std::time::Duration;

use serde_json::{Map, Value, json};

use centrifuge_session::client::Client;
use centrifuge_session::config::{BackoffReconnect, Config};
use centrifuge_session::events::EventStream;
use centrifuge_session::transport::Frame;
use centrifuge_session::transport::memory::{MemoryListener, MemoryPeer, MemoryTransport};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Fails the test instead of hanging on a future that never completes.
pub async fn within<F: IntoFuture>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future.into_future())
        .await
        .expect("timed out")
}

pub async fn next_event<E>(events: &mut EventStream<E>) -> E {
    within(events.recv()).await.expect("event stream ended")
}

/// Collects events up to and including the first one matching `last`.
pub async fn events_until<E>(events: &mut EventStream<E>, last: impl Fn(&E) -> bool) -> Vec<E> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = last(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Client config with fast, deterministic reconnects.
pub fn config() -> Config {
    Config::new()
        .use_json()
        .with_token("valid-token")
        .with_name("test")
        .with_reconnect_strategy(BackoffReconnect {
            factor: 2.0,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter: 0.0,
        })
}

pub fn client(config: Config) -> (Client, Server) {
    let (transport, listener) = MemoryTransport::new();
    let client = Client::with_transport("memory://centrifugo", config, transport.clone());
    (client, Server { listener, transport })
}

pub struct Server {
    pub listener: MemoryListener,
    pub transport: MemoryTransport,
}

impl Server {
    pub async fn accept(&mut self) -> Conn {
        let peer = within(self.listener.accept())
            .await
            .expect("listener closed");
        Conn {
            peer,
            pending: VecDeque::new(),
        }
    }

    /// Accepts a connection and completes the handshake.
    pub async fn accept_connected(&mut self) -> Conn {
        let mut conn = self.accept().await;
        conn.handshake().await;
        conn
    }
}

fn object(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_owned(), value);
    Value::Object(map)
}

/// Server side of one connection. Commands arrive as JSON values.
pub struct Conn {
    pub peer: MemoryPeer,
    pending: VecDeque<Value>,
}

impl Conn {
    /// Next command written by the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            if let Some(command) = self.pending.pop_front() {
                return Some(command);
            }
            let frame = within(self.peer.recv()).await?;
            match frame {
                Frame::Text(text) => {
                    for line in text.lines().filter(|line| !line.trim().is_empty()) {
                        self.pending
                            .push_back(serde_json::from_str(line).expect("invalid json"));
                    }
                }
                Frame::Close(_) => return None,
                frame => panic!("unexpected frame {:?}", frame),
            }
        }
    }

    /// Next command, which must be of `method`. Returns its id and body.
    pub async fn expect(&mut self, method: &str) -> (u64, Value) {
        let command = self.recv().await.expect("client closed");
        let body = command
            .get(method)
            .unwrap_or_else(|| panic!("expected {method}, got {command}"))
            .clone();
        let id = command["id"].as_u64().unwrap_or(0);
        (id, body)
    }

    /// Waits until the client drops the connection.
    pub async fn closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    pub fn send(&self, value: Value) {
        self.peer
            .send(Frame::Text(value.to_string()))
            .expect("client gone");
    }

    pub fn reply(&self, id: u64, method: &str, result: Value) {
        let mut reply = object(method, result);
        reply["id"] = json!(id);
        self.send(reply);
    }

    pub fn error(&self, id: u64, code: u32, message: &str) {
        self.send(json!({ "id": id, "error": { "code": code, "message": message } }));
    }

    pub fn push(&self, channel: &str, kind: &str, body: Value) {
        let mut push = object(kind, body);
        push["channel"] = json!(channel);
        self.send(json!({ "push": push }));
    }

    pub fn publish(&self, channel: &str, offset: u64, data: Value) {
        self.push(channel, "pub", json!({ "data": data, "offset": offset }));
    }

    pub fn ping(&self) {
        self.send(json!({}));
    }

    pub async fn handshake(&mut self) -> Value {
        self.handshake_with(json!({ "client": "client-1", "version": "6.0.0" }))
            .await
    }

    pub async fn handshake_with(&mut self, result: Value) -> Value {
        let (id, body) = self.expect("connect").await;
        self.reply(id, "connect", result);
        body
    }

    /// Acknowledges the next subscribe command; returns its body.
    pub async fn ack_subscribe(&mut self) -> Value {
        let (id, body) = self.expect("subscribe").await;
        self.reply(id, "subscribe", json!({}));
        body
    }
}
