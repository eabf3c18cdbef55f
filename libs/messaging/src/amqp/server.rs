//! Broker-backed server: consumes the named service queue, tracks where
//! each correlation ID replies to, and publishes responses there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::AmqpServerOptions;
use crate::{Request, RequestStream, RpcServer, TransportError};

/// Routes replies: correlation ID to the reply queue it goes back on.
type ReplyRoutes = Arc<DashMap<String, String>>;

struct ListenState {
    started: bool,
    request_tx: Option<mpsc::Sender<Request>>,
    pump: Option<JoinHandle<()>>,
}

/// AMQP request/reply server bound to one service queue.
pub struct AmqpServer {
    conn: Connection,
    channel: Channel,
    routing_key: String,
    options: AmqpServerOptions,
    reply_routes: ReplyRoutes,
    stream: RequestStream,
    listen_state: Mutex<ListenState>,
    closed: AtomicBool,
}

impl AmqpServer {
    /// Connects to the broker and declares the service queue named by
    /// `routing_key` (non-exclusive, not auto-delete).
    pub async fn connect(
        url: &str,
        routing_key: impl Into<String>,
        options: AmqpServerOptions,
    ) -> Result<Self, TransportError> {
        let routing_key = routing_key.into();
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(TransportError::Connect)?;
        let channel = conn
            .create_channel()
            .await
            .map_err(TransportError::Connect)?;

        channel
            .queue_declare(
                &routing_key,
                QueueDeclareOptions {
                    durable: options.durable_queue,
                    exclusive: false,
                    auto_delete: false,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Connect)?;

        let (request_tx, request_rx) = mpsc::channel(1);
        debug!(queue = %routing_key, "amqp server connected");

        Ok(Self {
            conn,
            channel,
            routing_key,
            options,
            reply_routes: Arc::new(DashMap::new()),
            stream: RequestStream::new(request_rx),
            listen_state: Mutex::new(ListenState {
                started: false,
                request_tx: Some(request_tx),
                pump: None,
            }),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RpcServer for AmqpServer {
    async fn listen(&self) -> Result<RequestStream, TransportError> {
        let mut state = self.listen_state.lock().await;
        if !state.started {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            let consumer = self
                .channel
                .basic_consume(
                    &self.routing_key,
                    "",
                    BasicConsumeOptions {
                        no_ack: true,
                        exclusive: false,
                        ..BasicConsumeOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(TransportError::Broker)?;

            let request_tx = state
                .request_tx
                .take()
                .expect("request sender available until listen starts");
            state.pump = Some(tokio::spawn(request_pump(
                consumer,
                request_tx,
                Arc::clone(&self.reply_routes),
            )));
            state.started = true;
        }
        Ok(self.stream.clone())
    }

    async fn reply(&self, correlation_id: &str, data: Vec<u8>) -> Result<(), TransportError> {
        // Removing the route makes a second reply for the same ID an
        // UnknownCorrelation error and keeps the map from growing.
        let Some((_, reply_to)) = self.reply_routes.remove(correlation_id) else {
            return Err(TransportError::UnknownCorrelation(correlation_id.to_string()));
        };

        let attempts = self.options.retry_count.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            let publish = self
                .channel
                .basic_publish(
                    "",
                    &reply_to,
                    BasicPublishOptions::default(),
                    &data,
                    BasicProperties::default()
                        .with_content_type("text/plain".into())
                        .with_correlation_id(correlation_id.into()),
                )
                .await;

            match publish {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        correlation_id = %correlation_id,
                        attempt,
                        attempts,
                        "reply publish failed: {e}"
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_backoff).await;
                    }
                }
            }
        }

        Err(TransportError::PublishFailed {
            attempts,
            source: last_err.expect("at least one publish attempt was made"),
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_err = None;
        for result in [
            self.channel.close(200, "server shutdown").await,
            self.conn.close(200, "server shutdown").await,
        ] {
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        // Stop the pump even if it is parked on a full stream buffer;
        // dropping its sender ends the request stream for workers.
        let mut state = self.listen_state.lock().await;
        state.request_tx.take();
        if let Some(pump) = state.pump.take() {
            pump.abort();
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    warn!("request pump task failed: {e}");
                }
            }
        }

        match first_err {
            Some(e) => Err(TransportError::Broker(e)),
            None => Ok(()),
        }
    }
}

/// Forwards service-queue deliveries into the shared request stream,
/// recording each delivery's reply route first. Deliveries missing either
/// correlation property cannot be answered and are dropped.
async fn request_pump(
    mut consumer: Consumer,
    request_tx: mpsc::Sender<Request>,
    reply_routes: ReplyRoutes,
) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                debug!("request consumer ended: {e}");
                break;
            }
        };

        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string());
        let reply_to = delivery
            .properties
            .reply_to()
            .as_ref()
            .map(|queue| queue.as_str().to_string());
        let (Some(correlation_id), Some(reply_to)) = (correlation_id, reply_to) else {
            debug!("request missing correlation id or reply-to dropped");
            continue;
        };

        reply_routes.insert(correlation_id.clone(), reply_to.clone());
        let request = Request {
            data: delivery.data,
            correlation_id,
            reply_to,
        };
        if request_tx.send(request).await.is_err() {
            // Every stream handle is gone; nobody is consuming.
            break;
        }
    }
    debug!("request pump stopped");
}
