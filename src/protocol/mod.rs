//! # Protocol Module
//!
//! Frame types of the Centrifugo client protocol v2, trimmed to what a
//! subscribing client exchanges with the server.
//!
//! - **Command**: client-to-server requests (connect, subscribe, unsubscribe,
//!   publish, ping)
//! - **Reply**: server responses; a reply with `id == 0` carries a push
//! - **Push**: server-initiated channel data (publications, join/leave,
//!   unsubscribe) or a connection-level disconnect
//!
//! The `Raw*` structs are the wire representation shared by the JSON and
//! Protobuf encodings; the enums are what the session works with.
//!
//! ```rust
//! use centrifuge_session::protocol::{Command, RawCommand, SubscribeRequest};
//!
//! let cmd = Command::Subscribe(SubscribeRequest {
//!     channel: "news".to_string(),
//!     ..Default::default()
//! });
//! let raw: RawCommand = cmd.into();
//! assert_eq!(raw.subscribe.unwrap().channel, "news");
//! ```

#[allow(clippy::module_inception)]
mod protocol;

pub use protocol::*;
use serde::{Serialize, Serializer};

/// Client-to-server commands.
#[derive(Debug, Clone)]
pub enum Command {
    Connect(ConnectRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Publish(PublishRequest),
    Ping(PingRequest),
    /// Pong answer to a server ping.
    Empty,
}

/// Server-to-client replies.
#[derive(Debug, Clone)]
pub enum Reply {
    Push(Push),
    Error(Error),
    Connect(ConnectResult),
    Subscribe(SubscribeResult),
    Unsubscribe(UnsubscribeResult),
    Publish(PublishResult),
    Ping(PingResult),
    /// Server ping.
    Empty,
}

/// Server-initiated message.
#[derive(Debug, Clone)]
pub struct Push {
    /// Empty for connection-level pushes.
    pub channel: String,
    pub data: PushData,
}

#[derive(Debug, Clone)]
pub enum PushData {
    Publication(Publication),
    Join(Join),
    Leave(Leave),
    Unsubscribe(Unsubscribe),
    Disconnect(Disconnect),
    Empty,
}

impl From<Command> for RawCommand {
    fn from(command: Command) -> Self {
        let mut raw = RawCommand::default();
        match command {
            Command::Connect(request) => raw.connect = Some(request),
            Command::Subscribe(request) => raw.subscribe = Some(request),
            Command::Unsubscribe(request) => raw.unsubscribe = Some(request),
            Command::Publish(request) => raw.publish = Some(request),
            Command::Ping(request) => raw.ping = Some(request),
            Command::Empty => {}
        }
        raw
    }
}

// An error wins over any result the server may have attached; a frame with
// nothing set is a ping.
impl From<RawReply> for Reply {
    fn from(raw: RawReply) -> Self {
        match raw {
            RawReply { error: Some(err), .. } => Self::Error(err),
            RawReply { push: Some(push), .. } => Self::Push(push.into()),
            RawReply { connect: Some(result), .. } => Self::Connect(result),
            RawReply { subscribe: Some(result), .. } => Self::Subscribe(result),
            RawReply { unsubscribe: Some(result), .. } => Self::Unsubscribe(result),
            RawReply { publish: Some(result), .. } => Self::Publish(result),
            RawReply { ping: Some(result), .. } => Self::Ping(result),
            _ => Self::Empty,
        }
    }
}

impl From<RawPush> for Push {
    fn from(raw: RawPush) -> Self {
        let data = match (raw.publication, raw.join, raw.leave, raw.unsubscribe, raw.disconnect) {
            (Some(publication), ..) => PushData::Publication(publication),
            (_, Some(join), ..) => PushData::Join(join),
            (_, _, Some(leave), ..) => PushData::Leave(leave),
            (_, _, _, Some(unsubscribe), _) => PushData::Unsubscribe(unsubscribe),
            (.., Some(disconnect)) => PushData::Disconnect(disconnect),
            _ => PushData::Empty,
        };
        Self {
            channel: raw.channel,
            data,
        }
    }
}

fn serialize_json<T: AsRef<[u8]>, S: Serializer>(v: &T, serializer: S) -> Result<S::Ok, S::Error> {
    let value: serde_json::Value = serde_json::from_slice(v.as_ref()).map_err(|e| {
        serde::ser::Error::custom(format!(
            "unable to serialize to json: {e}, consider using protobuf instead"
        ))
    })?;
    value.serialize(serializer)
}

fn deserialize_json<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<u8>, D::Error> {
    let value: serde_json::Value = serde::de::Deserialize::deserialize(deserializer)?;
    serde_json::to_vec(&value).map_err(serde::de::Error::custom)
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}
