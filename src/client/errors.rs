//! Request error types and the awaitable result wrapper.

use std::future::{Future, IntoFuture};

use thiserror::Error;

use crate::errors::ClientError;
use crate::protocol::Reply;

pub use super::dispatcher::ReplyError;

/// A wrapper around futures that can be polled to get results.
///
/// This is a regular future which you can poll to get result,
/// but it's totally fine to drop it if you don't need results:
/// the command has already been handed to the session.
///
/// # Example
///
/// ```rust,no_run
/// use centrifuge_session::client::Client;
/// use centrifuge_session::config::Config;
///
/// # async fn run() {
/// let client = Client::new("ws://localhost:8000/connection/websocket", Config::new());
///
/// // await it directly
/// let _ = client.connect().await;
///
/// // or convert and await later
/// let future = client.disconnect().into_future();
/// future.await;
/// # }
/// ```
pub struct FutureResult<T>(pub(crate) T);

impl<T, R> IntoFuture for FutureResult<T>
where
    T: Future<Output = R>,
{
    type Output = R;
    type IntoFuture = T;

    fn into_future(self) -> Self::IntoFuture {
        self.0
    }
}

/// Errors that can occur when publishing through the server.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The server returned an error response
    #[error("server error: {0}")]
    ErrorResponse(ClientError),

    /// The server returned an unexpected reply type
    #[error("unexpected reply from server")]
    UnexpectedReply(Reply),

    /// The request failed before a reply arrived
    #[error(transparent)]
    ReplyError(#[from] ReplyError),

    /// The request timed out
    #[error("request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// The session dropped the request
    #[error("request was cancelled")]
    Cancelled(#[from] tokio::sync::oneshot::error::RecvError),
}

impl RequestError {
    /// Whether the request never reached a server that answered it.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            RequestError::ReplyError(ReplyError::Closed) | RequestError::Cancelled(_)
        )
    }
}
