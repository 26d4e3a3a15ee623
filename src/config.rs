//! Session and subscription settings.
//!
//! [`Config`] is fixed when a [`Client`](crate::client::Client) is built,
//! except for the token which can be swapped later with
//! [`Client::set_token`](crate::client::Client::set_token).
//! [`SubscriptionConfig`] travels with every subscribe command of one
//! subscription, including resubscribes after a reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

/// Wire encoding of protocol frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// JSON encoding format
    ///
    /// Publication payloads must be valid JSON documents.
    Json,

    /// Protocol Buffer encoding format
    ///
    /// Payloads are opaque bytes.
    Protobuf,
}

/// Client session configuration
///
/// ## Example
///
/// ```rust
/// use centrifuge_session::config::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_token("your-auth-token")
///     .with_name("my-client")
///     .with_version("1.0.0")
///     .use_json()
///     .with_read_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Authentication token for the connection
    ///
    /// Sent in the connect command of every handshake. The token is opaque
    /// to the client; issuing and refreshing it is the caller's business.
    pub token: String,

    /// Client name identifier, reported to the server
    pub name: String,

    /// Client version string, reported to the server
    pub version: String,

    /// Protocol encoding format to use
    pub protocol: Protocol,

    /// Optional custom tokio runtime handle
    ///
    /// If provided, the session task is spawned on this runtime instead
    /// of the one the client is created in.
    pub runtime: Option<Handle>,

    /// Timeout for request/reply exchanges
    ///
    /// Bounds the connect handshake and publish requests.
    pub read_timeout: Duration,

    /// Interval between client pings
    ///
    /// Only used when the server does not announce its own ping
    /// interval in the connect reply.
    pub ping_interval: Duration,

    /// How long to wait for the reply to a client ping
    pub pong_timeout: Duration,

    /// Grace period on top of the server ping interval
    ///
    /// When the server pings, the connection is considered dead if no
    /// ping arrives within `ping + max_server_ping_delay`.
    pub max_server_ping_delay: Duration,

    /// Reconnection strategy for handling disconnections
    pub reconnect_strategy: Arc<dyn ReconnectStrategy>,
}

impl Default for Config {
    /// Creates default configuration with sensible defaults
    ///
    /// Defaults:
    /// - Empty token (anonymous connection)
    /// - Package name from Cargo.toml
    /// - Empty version
    /// - JSON protocol
    /// - No custom runtime
    /// - 5 second read timeout
    /// - 25 second client ping interval, 5 second pong timeout
    /// - 10 second server ping grace period
    /// - Exponential backoff reconnection with jitter
    fn default() -> Self {
        Config {
            token: String::new(),
            name: String::from(env!("CARGO_PKG_NAME")),
            version: String::new(),
            protocol: Protocol::Json,
            runtime: None,
            read_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(5),
            max_server_ping_delay: Duration::from_secs(10),
            reconnect_strategy: Arc::new(BackoffReconnect::default()),
        }
    }
}

impl Config {
    /// Same as `Config::default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authentication token
    ///
    /// ## Example
    ///
    /// ```rust
    /// use centrifuge_session::config::Config;
    ///
    /// let config = Config::new().with_token("secret-token");
    /// assert_eq!(config.token, "secret-token");
    /// ```
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Sets the client name reported in the handshake
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the client version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets a custom tokio runtime handle
    ///
    /// ## Example
    ///
    /// ```rust
    /// use centrifuge_session::config::Config;
    /// use tokio::runtime::Runtime;
    ///
    /// let runtime = Runtime::new().unwrap();
    /// let config = Config::new().with_runtime(runtime.handle().clone());
    /// assert!(config.runtime.is_some());
    /// ```
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets how long the handshake and publish requests may take
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the client ping interval
    ///
    /// A zero interval disables client pings.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the client pong timeout
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Sets the grace period added to the server ping interval
    pub fn with_max_server_ping_delay(mut self, delay: Duration) -> Self {
        self.max_server_ping_delay = delay;
        self
    }

    /// Sets the reconnection strategy
    ///
    /// ## Example
    ///
    /// ```rust
    /// use centrifuge_session::config::{Config, BackoffReconnect};
    /// use std::time::Duration;
    ///
    /// let strategy = BackoffReconnect {
    ///     factor: 1.5,
    ///     min_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_secs(10),
    ///     jitter: 0.2,
    /// };
    ///
    /// let config = Config::new().with_reconnect_strategy(strategy);
    /// ```
    pub fn with_reconnect_strategy(mut self, strategy: impl ReconnectStrategy) -> Self {
        self.reconnect_strategy = Arc::new(strategy);
        self
    }

    /// Sets the protocol to JSON encoding
    pub fn use_json(mut self) -> Self {
        self.protocol = Protocol::Json;
        self
    }

    /// Sets the protocol to Protobuf encoding
    ///
    /// The server must be told about it too, usually with a
    /// `?format=protobuf` query on the endpoint URL.
    pub fn use_protobuf(mut self) -> Self {
        self.protocol = Protocol::Protobuf;
        self
    }
}

/// Options sent with every subscribe command of one subscription
///
/// ## Example
///
/// ```rust
/// use centrifuge_session::config::SubscriptionConfig;
///
/// let config = SubscriptionConfig::new()
///     .with_token("channel-token")
///     .recoverable(true)
///     .join_leave(true);
///
/// assert!(config.recoverable);
/// assert!(!config.positioned);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Channel token for channels that require one
    pub token: String,

    /// Custom subscribe data, passed to the server as-is
    pub data: Vec<u8>,

    /// Ask the server to keep a recoverable stream position
    ///
    /// When set, resubscribes after a reconnect carry the last seen
    /// offset and epoch so missed publications can be recovered.
    pub recoverable: bool,

    /// Ask the server to track stream position
    pub positioned: bool,

    /// Receive join and leave notifications
    pub join_leave: bool,
}

impl SubscriptionConfig {
    /// Creates default subscription options
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the channel token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Sets custom subscribe data
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Enables or disables stream recovery
    pub fn recoverable(mut self, value: bool) -> Self {
        self.recoverable = value;
        self
    }

    /// Enables or disables positioning
    pub fn positioned(mut self, value: bool) -> Self {
        self.positioned = value;
        self
    }

    /// Enables or disables join/leave notifications
    pub fn join_leave(mut self, value: bool) -> Self {
        self.join_leave = value;
        self
    }
}

/// Trait for implementing custom reconnection strategies
///
/// ## Example
///
/// ```rust
/// use centrifuge_session::config::ReconnectStrategy;
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct LinearReconnect {
///     base_delay: Duration,
/// }
///
/// impl ReconnectStrategy for LinearReconnect {
///     fn time_before_next_attempt(&self, attempt: u32) -> Duration {
///         self.base_delay * attempt
///     }
/// }
/// ```
pub trait ReconnectStrategy: std::fmt::Debug + Send + Sync + 'static {
    /// Calculates the delay before the next reconnection attempt
    ///
    /// `attempt` is 1-based: the first retry after a failure or a lost
    /// connection is attempt 1.
    fn time_before_next_attempt(&self, attempt: u32) -> Duration;
}

/// Exponential backoff reconnection strategy with jitter
///
/// ## Algorithm
///
/// The base delay is `min_delay * factor^attempt`, clamped between
/// `min_delay` and `max_delay`. It is then multiplied by a random factor
/// in `[1 - jitter, 1 + jitter]` and clamped again, so the result never
/// leaves the configured bounds.
///
/// ## Example
///
/// ```rust
/// use centrifuge_session::config::{BackoffReconnect, ReconnectStrategy};
/// use std::time::Duration;
///
/// let strategy = BackoffReconnect {
///     factor: 2.0,
///     min_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
///     jitter: 0.0,
/// };
///
/// let delay1 = strategy.time_before_next_attempt(1);
/// let delay2 = strategy.time_before_next_attempt(2);
/// let delay3 = strategy.time_before_next_attempt(3);
///
/// assert!(delay1 < delay2);
/// assert!(delay2 < delay3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffReconnect {
    /// Exponential factor for backoff calculation
    pub factor: f64,

    /// Minimum delay between attempts
    pub min_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Relative jitter in `0.0..=1.0`; zero disables randomization
    pub jitter: f64,
}

impl BackoffReconnect {
    fn base_delay(&self, attempt: u32) -> f64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let time = self.min_delay.as_secs_f64() * self.factor.powi(exponent);
        if time.is_finite() {
            time.clamp(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        }
    }
}

impl ReconnectStrategy for BackoffReconnect {
    fn time_before_next_attempt(&self, attempt: u32) -> Duration {
        if self.min_delay > self.max_delay {
            return self.max_delay;
        }

        let time = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let time = if jitter > 0.0 {
            let scale = 1.0 - jitter + 2.0 * jitter * fastrand::f64();
            (time * scale).clamp(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64())
        } else {
            time
        };
        Duration::from_secs_f64(time)
    }
}

impl Default for BackoffReconnect {
    /// Creates default exponential backoff strategy
    ///
    /// Defaults:
    /// - **factor**: 2.0 (doubling each attempt)
    /// - **min_delay**: 200ms
    /// - **max_delay**: 20 seconds
    /// - **jitter**: 0.25
    fn default() -> Self {
        BackoffReconnect {
            factor: 2.0,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            jitter: 0.25,
        }
    }
}
