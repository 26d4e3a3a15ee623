//! Bidirectional message transports.
//!
//! A [`Transport`] opens a [`TransportStream`]: a frame sink paired with a lazy
//! sequence of inbound frames. The session never frames bytes itself, it only
//! hands encoded protocol batches to the stream and reads whole frames back.

pub mod memory;
pub mod websocket;

use std::fmt;
use std::pin::Pin;

use futures::future::BoxFuture;
use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::errors::{ConnectError, SendError, StreamError};

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Graceful close, optionally with a Centrifugo disconnect code.
    Close(Option<CloseFrame>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Opens connections to a server.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<TransportStream, ConnectError>>;
}

type FrameSink = Pin<Box<dyn Sink<Frame, Error = SendError> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, StreamError>> + Send>>;

/// An open connection.
///
/// `next` yields frames in receive order until the peer closes (`None`) or
/// the connection breaks (`Some(Err(_))`). The sequence cannot be restarted.
pub struct TransportStream {
    sink: FrameSink,
    stream: FrameStream,
    open: bool,
}

impl TransportStream {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = SendError> + Send + 'static,
        St: Stream<Item = Result<Frame, StreamError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
            open: true,
        }
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), SendError> {
        if !self.open {
            return Err(SendError::NotOpen);
        }
        self.sink.send(frame).await
    }

    pub async fn next(&mut self) -> Option<Result<Frame, StreamError>> {
        self.stream.next().await
    }

    /// Closes the outbound half. Further sends fail with `SendError::NotOpen`.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.sink.close().await {
            log::debug!("failed to close transport: {}", err);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportStream")
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
