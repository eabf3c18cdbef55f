//! Worker-pool consumer: pulls requests from the server transport, runs
//! the handler, and publishes the reply.

use std::sync::Arc;

use messaging::{RpcServer, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Turns a raw request body into a raw response body.
///
/// Implementations must not panic; anything unparseable is answered with an
/// error envelope, so the transport-visible return is always a body.
pub trait RequestHandler: Send + Sync + 'static {
    fn execute(&self, raw: &[u8]) -> Vec<u8>;
}

impl<F> RequestHandler for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn execute(&self, raw: &[u8]) -> Vec<u8> {
        self(raw)
    }
}

/// Fixed pool of workers over one shared request stream.
///
/// Requests are taken FIFO from the stream but workers complete
/// independently, so replies carry no cross-request ordering guarantee.
pub struct Consumer<S: RpcServer> {
    server: Arc<S>,
    worker_count: usize,
    handler: Arc<dyn RequestHandler>,
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: RpcServer + 'static> Consumer<S> {
    pub fn new(server: Arc<S>, worker_count: usize, handler: Arc<dyn RequestHandler>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            server,
            worker_count: worker_count.max(1),
            handler,
            stop_tx,
            workers: Vec::new(),
        }
    }

    /// Starts delivery and spawns the worker pool.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        let stream = self.server.listen().await?;

        for worker_id in 0..self.worker_count {
            let stream = stream.clone();
            let server = Arc::clone(&self.server);
            let handler = Arc::clone(&self.handler);
            let mut stop_rx = self.stop_tx.subscribe();

            self.workers.push(tokio::spawn(async move {
                loop {
                    let request = tokio::select! {
                        _ = stop_rx.changed() => break,
                        request = stream.recv() => match request {
                            Some(request) => request,
                            // Server transport closed the stream.
                            None => break,
                        },
                    };

                    let response = handler.execute(&request.data);
                    if let Err(e) = server.reply(&request.correlation_id, response).await {
                        warn!(
                            worker_id,
                            correlation_id = %request.correlation_id,
                            "failed to publish reply: {e}"
                        );
                    }
                }
                debug!(worker_id, "consumer worker stopped");
            }));
        }

        Ok(())
    }

    /// Signals every worker to stop and waits for them to exit. In-flight
    /// handler calls run to completion.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}
