//! In-process transport.
//!
//! Every successful [`MemoryTransport::connect`] hands a [`MemoryPeer`] to the
//! paired [`MemoryListener`], which plays the server side of the connection.
//!
//! ```rust
//! use centrifuge_session::transport::memory::MemoryTransport;
//! use centrifuge_session::transport::{Frame, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (transport, mut listener) = MemoryTransport::new();
//! let mut stream = transport.connect("memory://test").await.unwrap();
//! let mut peer = listener.accept().await.unwrap();
//!
//! stream.send(Frame::Text("{}".into())).await.unwrap();
//! assert_eq!(peer.recv().await, Some(Frame::Text("{}".into())));
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, Stream, StreamExt};

use super::{CloseFrame, Frame, Transport, TransportStream};
use crate::errors::{ConnectError, SendError, StreamError};

#[derive(Clone)]
pub struct MemoryTransport {
    listener: mpsc::UnboundedSender<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

impl MemoryTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded();
        let transport = Self {
            listener: tx,
            refusing: Arc::new(AtomicBool::new(false)),
        };
        (transport, MemoryListener { peers: rx })
    }

    /// While set, `connect` fails with `ConnectError::Refused`.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<TransportStream, ConnectError>> {
        if self.refusing.load(Ordering::SeqCst) {
            return future::ready(Err(ConnectError::Refused)).boxed();
        }

        let (to_client, client_rx) = mpsc::unbounded();
        let (client_tx, from_client) = mpsc::unbounded();
        let peer = MemoryPeer {
            url: url.to_owned(),
            to_client,
            from_client,
        };

        let result = match self.listener.unbounded_send(peer) {
            Ok(()) => {
                let sink = client_tx.sink_map_err(|_| SendError::NotOpen);
                Ok(TransportStream::new(sink, client_rx))
            }
            Err(_) => Err(ConnectError::Refused),
        };
        future::ready(result).boxed()
    }
}

/// Receives the server side of every connection made through the paired
/// transport. Dropping it makes further connects fail.
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.next().await
    }
}

impl Stream for MemoryListener {
    type Item = MemoryPeer;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.peers.poll_next_unpin(cx)
    }
}

/// Server side of one in-memory connection.
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<Result<Frame, StreamError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// URL the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.to_client
            .unbounded_send(Ok(frame))
            .map_err(|_| SendError::NotOpen)
    }

    /// Next frame written by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }

    /// Closes gracefully with a disconnect code.
    pub fn close(self, code: u16, reason: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))));
    }

    /// Breaks the connection, the client sees a `StreamError`.
    pub fn abort(self) {
        let _ = self
            .to_client
            .unbounded_send(Err(StreamError::Abnormal("connection reset".into())));
    }

    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
