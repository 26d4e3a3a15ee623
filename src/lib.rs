//! Client session and subscription manager for Centrifugo real-time servers.
//!
//! A [`Client`](client::Client) keeps one connection to a server alive:
//! it performs the handshake, answers keep-alive pings and reconnects with
//! backoff. [`Subscription`](subscription::Subscription)s layered on top of
//! it deliver channel publications in order and are restored after every
//! reconnect.

pub mod client;
mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod subscription;
pub mod transport;

// WebSocketTransport reports tungstenite errors, so we re-export it to make
// sure user has the same version.
pub use tokio_tungstenite::tungstenite;
