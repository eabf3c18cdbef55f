//! Request/reply transport contract.
//!
//! Two roles share nothing but the [`Request`] record and the semantics of
//! the traits below: a client submits opaque bytes and receives a single-shot
//! reply channel; a server consumes a stream of requests and publishes
//! replies keyed by correlation ID. The AMQP implementation ([`amqp`]) and
//! the in-process implementation ([`inproc`]) satisfy the same contract and
//! the same test suite, so anything built against the traits can run with or
//! without a broker.

pub mod amqp;
pub mod inproc;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

pub use amqp::{
    broker_url, AmqpClient, AmqpClientOptions, AmqpServer, AmqpServerOptions, DEFAULT_AMQP_URL,
};
pub use inproc::{InprocClient, InprocServer};

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("transport is closed")]
    Closed,

    #[error("publish failed after {attempts} attempt(s): {source}")]
    PublishFailed {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    #[error("no reply route for correlation id {0}")]
    UnknownCorrelation(String),

    #[error("broker error: {0}")]
    Broker(#[source] lapin::Error),
}

/// The server's view of an incoming message: the payload plus the
/// correlation info needed to route a reply back to the right client.
#[derive(Debug, Clone)]
pub struct Request {
    pub data: Vec<u8>,
    pub correlation_id: String,
    pub reply_to: String,
}

/// Single-shot reply channel handed out by [`RpcClient::request`].
///
/// Resolves with exactly one reply body, or errs when the sender side is
/// dropped on timeout or shutdown. Never both.
pub type ReplyReceiver = oneshot::Receiver<Vec<u8>>;

/// A clonable handle onto the server's incoming request stream.
///
/// Clones share one underlying FIFO queue, which is what lets a pool of
/// workers pull from the same stream. `recv` returns `None` once the
/// transport behind the stream has closed.
#[derive(Debug, Clone)]
pub struct RequestStream {
    inner: Arc<Mutex<mpsc::Receiver<Request>>>,
}

impl RequestStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Request>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    pub async fn recv(&self) -> Option<Request> {
        self.inner.lock().await.recv().await
    }
}

/// Client role: submit a request, get a reply channel.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Sends `data` to the service queue and returns the channel the reply
    /// will arrive on. Fails with [`TransportError::Closed`] after `close`.
    async fn request(&self, data: Vec<u8>) -> Result<ReplyReceiver, TransportError>;

    /// Tears down the transport. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Server role: consume requests, publish replies.
#[async_trait]
pub trait RpcServer: Send + Sync {
    /// Starts delivery (once) and returns the shared request stream.
    /// Repeated calls return the same stream.
    async fn listen(&self) -> Result<RequestStream, TransportError>;

    /// Publishes `data` as the reply for `correlation_id`. Fails with
    /// [`TransportError::UnknownCorrelation`] if the ID was never seen or
    /// was already replied to.
    async fn reply(&self, correlation_id: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Stops delivery and releases transport resources.
    async fn close(&self) -> Result<(), TransportError>;
}
