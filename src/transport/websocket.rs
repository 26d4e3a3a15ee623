//! WebSocket transport built on tokio-tungstenite.
//!
//! The URL is used as-is: pick `ws://`/`wss://` and, for the Protobuf protocol,
//! append `?format=protobuf` as the server expects.

use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{CloseFrame, Frame, Transport, TransportStream};
use crate::errors::{ConnectError, SendError, StreamError};

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<TransportStream, ConnectError>> {
        let url = url.to_owned();
        async move {
            log::debug!("connecting to {}", &url);
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|err| {
                    log::debug!("{err}");
                    connect_error(err)
                })?;

            let (write, read) = stream.split();
            let sink = write
                .sink_map_err(|err| SendError::Io(err.to_string()))
                .with(|frame: Frame| future::ready(Ok::<_, SendError>(into_message(frame))));
            let stream = read.filter_map(|message| future::ready(from_message(message)));

            Ok(TransportStream::new(sink, stream))
        }
        .boxed()
    }
}

fn connect_error(err: WsError) -> ConnectError {
    match err {
        // invalid url, don't reconnect
        WsError::Url(err) => ConnectError::InvalidUrl(err.to_string()),
        WsError::Io(err) => ConnectError::Io(err.to_string()),
        WsError::Http(response) => ConnectError::Handshake(format!("http {}", response.status())),
        err => ConnectError::Handshake(err.to_string()),
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Close(close_frame) => Message::Close(close_frame.map(|frame| WsCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.into(),
        })),
    }
}

fn from_message(message: Result<Message, WsError>) -> Option<Result<Frame, StreamError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
        Ok(Message::Close(close_frame)) => Some(Ok(Frame::Close(close_frame.map(|frame| {
            CloseFrame {
                code: frame.code.into(),
                reason: frame.reason.as_str().to_owned(),
            }
        })))),
        Ok(_) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(err) => {
            log::debug!("failed to read message: {}", err);
            Some(Err(StreamError::Abnormal(err.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_keeps_code_and_reason() {
        let message = into_message(Frame::Close(Some(CloseFrame {
            code: 3500,
            reason: "invalid token".into(),
        })));
        let frame = from_message(Ok(message)).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Close(Some(CloseFrame {
                code: 3500,
                reason: "invalid token".into(),
            }))
        );
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(from_message(Ok(Message::Ping(Vec::new().into()))).is_none());
        assert!(from_message(Err(WsError::ConnectionClosed)).is_none());
    }

    #[test]
    fn bad_url_is_not_retried() {
        let err = connect_error(WsError::Url(
            tokio_tungstenite::tungstenite::error::UrlError::NoHostName,
        ));
        assert!(!err.should_reconnect());
    }
}
