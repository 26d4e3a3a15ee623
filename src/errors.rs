use std::fmt;

use thiserror::Error;

/// Error codes the server puts into error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorCode {
    Internal,
    Unauthorized,
    UnknownChannel,
    PermissionDenied,
    MethodNotFound,
    AlreadySubscribed,
    LimitExceeded,
    BadRequest,
    NotAvailable,
    TokenExpired,
    Expired,
    TooManyRequests,
    UnrecoverablePosition,
    Other(u32),
}

impl ClientErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Internal => 100,
            Self::Unauthorized => 101,
            Self::UnknownChannel => 102,
            Self::PermissionDenied => 103,
            Self::MethodNotFound => 104,
            Self::AlreadySubscribed => 105,
            Self::LimitExceeded => 106,
            Self::BadRequest => 107,
            Self::NotAvailable => 108,
            Self::TokenExpired => 109,
            Self::Expired => 110,
            Self::TooManyRequests => 111,
            Self::UnrecoverablePosition => 112,
            Self::Other(code) => code,
        }
    }

    /// Whether the code means the token itself was refused.
    pub fn is_auth_failure(self) -> bool {
        matches!(self, Self::Unauthorized | Self::TokenExpired)
    }
}

impl From<u32> for ClientErrorCode {
    fn from(code: u32) -> Self {
        match code {
            100 => Self::Internal,
            101 => Self::Unauthorized,
            102 => Self::UnknownChannel,
            103 => Self::PermissionDenied,
            104 => Self::MethodNotFound,
            105 => Self::AlreadySubscribed,
            106 => Self::LimitExceeded,
            107 => Self::BadRequest,
            108 => Self::NotAvailable,
            109 => Self::TokenExpired,
            110 => Self::Expired,
            111 => Self::TooManyRequests,
            112 => Self::UnrecoverablePosition,
            code => Self::Other(code),
        }
    }
}

/// Error reply returned by the server for a single command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("server error {}: {message}", .code.as_u32())]
pub struct ClientError {
    pub code: ClientErrorCode,
    pub message: String,
    pub temporary: bool,
}

impl ClientError {
    pub fn new(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            temporary: false,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Internal, message)
    }
}

impl From<crate::protocol::Error> for ClientError {
    fn from(err: crate::protocol::Error) -> Self {
        Self {
            code: err.code.into(),
            message: err.message,
            temporary: err.temporary,
        }
    }
}

/// Disconnect code, sent by the server in a disconnect push or as the
/// WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectErrorCode(pub u16);

impl DisconnectErrorCode {
    pub const DISCONNECT_CALLED: Self = Self(0);
    pub const CONNECTION_CLOSED: Self = Self(3000);
    pub const SHUTDOWN: Self = Self(3001);
    pub const SERVER_ERROR: Self = Self(3004);
    pub const EXPIRED: Self = Self(3005);
    pub const SUBSCRIPTION_EXPIRED: Self = Self(3006);
    pub const SLOW: Self = Self(3008);
    pub const WRITE_ERROR: Self = Self(3009);
    pub const INSUFFICIENT_STATE: Self = Self(3010);
    pub const FORCE_RECONNECT: Self = Self(3011);
    pub const NO_PONG: Self = Self(3012);
    pub const TOO_MANY_REQUESTS: Self = Self(3013);
    pub const INVALID_TOKEN: Self = Self(3500);
    pub const BAD_REQUEST: Self = Self(3501);
    pub const STALE: Self = Self(3502);
    pub const FORCE_NO_RECONNECT: Self = Self(3503);
    pub const CONNECTION_LIMIT: Self = Self(3504);
    pub const CHANNEL_LIMIT: Self = Self(3505);
    pub const INAPPROPRIATE_PROTOCOL: Self = Self(3506);
    pub const PERMISSION_DENIED: Self = Self(3507);
    pub const NOT_AVAILABLE: Self = Self(3508);
    pub const TOO_MANY_ERRORS: Self = Self(3509);

    /// Whether the client is expected to reconnect after this code.
    ///
    /// Codes below 3500 and the custom range 4000..4500 are transient,
    /// 3500..4000 and 4500..5000 are terminal. Anything else, including
    /// the standard WebSocket close codes, is treated as transient.
    pub fn should_reconnect(self) -> bool {
        !matches!(self.0, 3500..=3999 | 4500..=4999)
    }

    /// Whether the server refused the connection token.
    pub fn is_auth_failure(self) -> bool {
        self == Self::INVALID_TOKEN || self == Self::EXPIRED
    }
}

impl From<u16> for DisconnectErrorCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<u32> for DisconnectErrorCode {
    fn from(code: u32) -> Self {
        Self(u16::try_from(code).unwrap_or(u16::MAX))
    }
}

impl fmt::Display for DisconnectErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match *self {
            Self::DISCONNECT_CALLED => "disconnect called",
            Self::CONNECTION_CLOSED => "connection closed",
            Self::SHUTDOWN => "shutdown",
            Self::SERVER_ERROR => "internal server error",
            Self::EXPIRED => "connection expired",
            Self::SUBSCRIPTION_EXPIRED => "subscription expired",
            Self::SLOW => "slow",
            Self::WRITE_ERROR => "write error",
            Self::INSUFFICIENT_STATE => "insufficient state",
            Self::FORCE_RECONNECT => "force reconnect",
            Self::NO_PONG => "no ping",
            Self::TOO_MANY_REQUESTS => "too many requests",
            Self::INVALID_TOKEN => "invalid token",
            Self::BAD_REQUEST => "bad request",
            Self::STALE => "stale",
            Self::FORCE_NO_RECONNECT => "force disconnect",
            Self::CONNECTION_LIMIT => "connection limit",
            Self::CHANNEL_LIMIT => "channel limit",
            Self::INAPPROPRIATE_PROTOCOL => "inappropriate protocol",
            Self::PERMISSION_DENIED => "permission denied",
            Self::NOT_AVAILABLE => "not available",
            Self::TOO_MANY_ERRORS => "too many errors",
            _ => "unknown",
        };
        f.write_str(reason)
    }
}

/// Failure to open a transport or to complete the handshake on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection refused")]
    Refused,
    #[error("handshake timed out")]
    Timeout,
    #[error("connect rejected: {0}")]
    Rejected(ClientError),
}

impl ConnectError {
    pub fn should_reconnect(&self) -> bool {
        match self {
            ConnectError::InvalidUrl(_) => false,
            ConnectError::Rejected(err) => err.temporary,
            _ => true,
        }
    }
}

/// Failure to write a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("stream is not open")]
    NotOpen,
    #[error("write failed: {0}")]
    Io(String),
}

/// Abnormal end of an established connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream terminated: {0}")]
    Abnormal(String),
    #[error("keep-alive timed out")]
    KeepAliveTimeout,
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// The server refused the connection token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Rejected(ClientError),
    #[error("disconnected by server: {code} ({reason})")]
    Disconnected {
        code: DisconnectErrorCode,
        reason: String,
    },
    #[error("token was rejected, set a fresh token before reconnecting")]
    StaleToken,
}

/// A live subscription for the channel already exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("duplicate subscription to channel {channel}")]
pub struct DuplicateSubscriptionError {
    pub channel: String,
}

/// Outcome of a subscribe request that did not end in `Subscribed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateSubscriptionError),
    #[error("subscription rejected: {code} {reason}")]
    Rejected { code: u32, reason: String },
    #[error("unsubscribed before the subscription completed")]
    Unsubscribed,
    #[error("client closed")]
    Closed,
}

/// Connection-level error surfaced through `ClientEvent::Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Reason a `Client::connect` future resolved without a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailed {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("connect failed: {0}")]
    Terminal(ConnectError),
    #[error("disconnected by server: {code} ({reason})")]
    Disconnected {
        code: DisconnectErrorCode,
        reason: String,
    },
    #[error("disconnect called")]
    Cancelled,
    #[error("client closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_code_ranges() {
        assert!(DisconnectErrorCode::CONNECTION_CLOSED.should_reconnect());
        assert!(DisconnectErrorCode::NO_PONG.should_reconnect());
        assert!(DisconnectErrorCode(4100).should_reconnect());
        assert!(DisconnectErrorCode(1006).should_reconnect());
        assert!(!DisconnectErrorCode::INVALID_TOKEN.should_reconnect());
        assert!(!DisconnectErrorCode::FORCE_NO_RECONNECT.should_reconnect());
        assert!(!DisconnectErrorCode(4600).should_reconnect());
    }

    #[test]
    fn auth_codes() {
        assert!(DisconnectErrorCode::INVALID_TOKEN.is_auth_failure());
        assert!(DisconnectErrorCode::EXPIRED.is_auth_failure());
        assert!(!DisconnectErrorCode::SHUTDOWN.is_auth_failure());
        assert!(ClientErrorCode::from(109).is_auth_failure());
        assert!(!ClientErrorCode::from(103).is_auth_failure());
    }

    #[test]
    fn client_error_code_round_trip() {
        for code in 100..=112 {
            assert_eq!(ClientErrorCode::from(code).as_u32(), code);
        }
        assert_eq!(ClientErrorCode::from(4001), ClientErrorCode::Other(4001));
    }

    #[test]
    fn display() {
        let err = ClientError::new(ClientErrorCode::PermissionDenied, "permission denied");
        assert_eq!(err.to_string(), "server error 103: permission denied");
        assert_eq!(DisconnectErrorCode::NO_PONG.to_string(), "no ping");
    }
}
