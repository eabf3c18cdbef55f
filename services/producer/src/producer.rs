//! Bounded dispatcher: drives a request feed through the client transport
//! under a pending-request cap, racing every reply against a timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use messaging::RpcClient;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

use crate::feed::{FeedError, RequestFeed};

/// Invoked with every reply body; errors are logged, never fatal.
pub type ResponseHandler = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// Tracks in-flight request tasks so start/close can wait for them.
struct InflightGauge {
    count: AtomicUsize,
    zero: Notify,
}

impl InflightGauge {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            zero: Notify::new(),
        }
    }

    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }

    async fn drained(&self) {
        loop {
            // Register before checking so an exit between the check and the
            // await cannot be missed.
            let notified = self.zero.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Feed-driven dispatcher with a hard cap on outstanding requests.
///
/// The semaphore is the sole back-pressure mechanism: there is no queue in
/// front of it, so `max_pending` is the true cap on outstanding requests
/// per client.
pub struct Producer<C: RpcClient> {
    client: Arc<C>,
    handler: ResponseHandler,
    feed: Mutex<Box<dyn RequestFeed>>,
    timeout: Duration,
    limiter: Arc<Semaphore>,
    inflight: Arc<InflightGauge>,
    stop_tx: watch::Sender<bool>,
}

impl<C: RpcClient + 'static> Producer<C> {
    pub fn new(
        client: Arc<C>,
        handler: ResponseHandler,
        feed: Box<dyn RequestFeed>,
        timeout: Duration,
        max_pending: usize,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            client,
            handler,
            feed: Mutex::new(feed),
            timeout,
            limiter: Arc::new(Semaphore::new(max_pending.max(1))),
            inflight: Arc::new(InflightGauge::new()),
            stop_tx,
        }
    }

    /// Drives the feed until it is exhausted or `close` is signaled, then
    /// waits for every in-flight request to finish.
    pub async fn start(&self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        {
            let mut feed = self.feed.lock().await;
            loop {
                if *stop_rx.borrow() || feed.is_empty() {
                    break;
                }

                let envelope = match feed.next() {
                    Ok(envelope) => envelope,
                    Err(FeedError::Exhausted) => break,
                    Err(e) => {
                        warn!("skipping feed entry: {e}");
                        continue;
                    }
                };

                // Blocks while max_pending requests are outstanding.
                let permit = tokio::select! {
                    _ = stop_rx.changed() => break,
                    permit = Arc::clone(&self.limiter).acquire_owned() => {
                        permit.expect("request limiter is never closed")
                    }
                };

                self.spawn_request(envelope, permit);
            }
        }

        self.inflight.drained().await;
        Ok(())
    }

    /// Signals the feed loop to stop, waits for in-flight requests, and
    /// closes the feed. Call once.
    pub async fn close(&self) {
        let _ = self.stop_tx.send(true);
        // Taking the feed lock waits out a running start() loop, so no new
        // request can slip in after the drain below.
        let mut feed = self.feed.lock().await;
        self.inflight.drained().await;
        feed.close();
    }

    /// Current number of in-flight requests; never exceeds `max_pending`.
    pub fn in_flight(&self) -> usize {
        self.inflight.count.load(Ordering::SeqCst)
    }

    fn spawn_request(&self, envelope: codec::CommandEnvelope, permit: OwnedSemaphorePermit) {
        let client = Arc::clone(&self.client);
        let handler = Arc::clone(&self.handler);
        let gauge = Arc::clone(&self.inflight);
        let timeout = self.timeout;
        gauge.enter();

        tokio::spawn(async move {
            // Held until this request settles; releasing it frees a slot.
            let _permit = permit;

            let raw = match envelope.to_json() {
                Ok(raw) => raw,
                Err(e) => {
                    error!("failed to serialize command: {e}");
                    gauge.exit();
                    return;
                }
            };

            let reply = match client.request(raw.into_bytes()).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("failed to send command: {e}");
                    gauge.exit();
                    return;
                }
            };

            tokio::select! {
                result = reply => match result {
                    Ok(body) => {
                        if let Err(e) = handler(&body) {
                            warn!("response handler failed: {e}");
                        }
                    }
                    Err(_) => debug!("reply channel closed before a response arrived"),
                },
                _ = tokio::time::sleep(timeout) => {
                    warn!("no response received in time");
                }
            }
            gauge.exit();
        });
    }
}
