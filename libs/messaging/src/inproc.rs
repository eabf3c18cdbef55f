//! In-process transport: the same request/reply contract over channels,
//! with no broker. Used by tests and single-process deployments.
//!
//! The server owns the request stream and a map from correlation ID to the
//! client that issued the request; replies are routed back by handing the
//! payload to that client, which completes the registered reply channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::{ReplyReceiver, Request, RequestStream, RpcClient, RpcServer, TransportError};

/// Per-client state shared with the server for reply routing.
#[derive(Debug, Default)]
struct ClientCore {
    pending: DashMap<String, oneshot::Sender<Vec<u8>>>,
    closed: AtomicBool,
}

impl ClientCore {
    /// Completes the reply channel registered under `correlation_id`.
    /// Exactly one of this and the timeout watcher wins the atomic remove.
    fn deliver_reply(&self, correlation_id: &str, data: Vec<u8>) {
        match self.pending.remove(correlation_id) {
            Some((_, reply_tx)) => {
                let _ = reply_tx.send(data);
            }
            None => {
                debug!(correlation_id = %correlation_id, "late in-process reply dropped");
            }
        }
    }
}

/// Server-side shared state.
#[derive(Debug)]
struct ServerCore {
    request_tx: Mutex<Option<mpsc::Sender<Request>>>,
    clients: DashMap<String, Arc<ClientCore>>,
    closed: AtomicBool,
}

/// In-process server half. Construct one, then hand out clients with
/// [`InprocServer::client`].
#[derive(Debug)]
pub struct InprocServer {
    core: Arc<ServerCore>,
    stream: RequestStream,
}

impl InprocServer {
    pub fn new() -> Self {
        // Capacity 1 approximates the original's unbuffered hand-off: a
        // sender parks until a worker is ready to take the request.
        let (request_tx, request_rx) = mpsc::channel(1);
        Self {
            core: Arc::new(ServerCore {
                request_tx: Mutex::new(Some(request_tx)),
                clients: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
            stream: RequestStream::new(request_rx),
        }
    }

    /// Creates a client wired to this server. `request_timeout` behaves as
    /// on the AMQP client: when set, an unanswered reply channel is closed
    /// after the timeout.
    pub fn client(&self, request_timeout: Option<Duration>) -> InprocClient {
        InprocClient {
            core: Arc::new(ClientCore::default()),
            server: Arc::clone(&self.core),
            request_timeout,
        }
    }
}

impl Default for InprocServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcServer for InprocServer {
    async fn listen(&self) -> Result<RequestStream, TransportError> {
        Ok(self.stream.clone())
    }

    async fn reply(&self, correlation_id: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let Some((_, client)) = self.core.clients.remove(correlation_id) else {
            return Err(TransportError::UnknownCorrelation(correlation_id.to_string()));
        };
        client.deliver_reply(correlation_id, data);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender ends the request stream for workers.
        self.core
            .request_tx
            .lock()
            .expect("request sender lock")
            .take();
        self.core.clients.clear();
        Ok(())
    }
}

/// In-process client half.
#[derive(Debug)]
pub struct InprocClient {
    core: Arc<ClientCore>,
    server: Arc<ServerCore>,
    request_timeout: Option<Duration>,
}

#[async_trait]
impl RpcClient for InprocClient {
    async fn request(&self, data: Vec<u8>) -> Result<ReplyReceiver, TransportError> {
        if self.core.closed.load(Ordering::SeqCst) || self.server.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let request_tx = {
            let guard = self.server.request_tx.lock().expect("request sender lock");
            guard.clone()
        };
        let Some(request_tx) = request_tx else {
            return Err(TransportError::Closed);
        };

        let correlation_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.core.pending.insert(correlation_id.clone(), reply_tx);
        self.server
            .clients
            .insert(correlation_id.clone(), Arc::clone(&self.core));

        let request = Request {
            data,
            correlation_id: correlation_id.clone(),
            reply_to: correlation_id.clone(),
        };
        if request_tx.send(request).await.is_err() {
            self.core.pending.remove(&correlation_id);
            self.server.clients.remove(&correlation_id);
            return Err(TransportError::Closed);
        }

        if let Some(timeout) = self.request_timeout {
            let core = Arc::clone(&self.core);
            let correlation_id = correlation_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if core.pending.remove(&correlation_id).is_some() {
                    debug!(correlation_id = %correlation_id, "request timed out, reply channel closed");
                }
            });
        }

        Ok(reply_rx)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Waiters observe closed reply channels instead of hanging.
        self.core.pending.clear();
        Ok(())
    }
}
