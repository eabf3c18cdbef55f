//! Broker-backed client: ephemeral reply queue plus a background reply
//! demultiplexer keyed by correlation ID.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AmqpClientOptions;
use crate::{ReplyReceiver, RpcClient, TransportError};

type PendingReplies = Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>;

/// AMQP request/reply client.
///
/// One channel publishes requests, a second consumes the client's
/// exclusive auto-delete reply queue; the two are never used for the same
/// direction, which keeps publishes and deliveries off each other's backs.
pub struct AmqpClient {
    conn: Connection,
    pub_channel: Channel,
    sub_channel: Channel,
    routing_key: String,
    reply_queue: String,
    options: AmqpClientOptions,
    pending: PendingReplies,
    closed: AtomicBool,
    demux: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpClient {
    /// Connects to the broker, declares the ephemeral reply queue, and
    /// starts the reply demultiplexer. `routing_key` is the service queue
    /// requests are published to.
    pub async fn connect(
        url: &str,
        routing_key: impl Into<String>,
        options: AmqpClientOptions,
    ) -> Result<Self, TransportError> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(TransportError::Connect)?;
        let pub_channel = conn
            .create_channel()
            .await
            .map_err(TransportError::Connect)?;
        let sub_channel = conn
            .create_channel()
            .await
            .map_err(TransportError::Connect)?;

        // Broker-named, exclusive to this connection, gone when it is.
        let queue = sub_channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Connect)?;
        let reply_queue = queue.name().as_str().to_string();

        let consumer = sub_channel
            .basic_consume(
                &reply_queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(TransportError::Connect)?;

        let pending: PendingReplies = Arc::new(DashMap::new());
        let demux = tokio::spawn(reply_demux(consumer, Arc::clone(&pending)));
        debug!(reply_queue = %reply_queue, "amqp client connected");

        Ok(Self {
            conn,
            pub_channel,
            sub_channel,
            routing_key: routing_key.into(),
            reply_queue,
            options,
            pending,
            closed: AtomicBool::new(false),
            demux: Mutex::new(Some(demux)),
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }
}

#[async_trait]
impl RpcClient for AmqpClient {
    async fn request(&self, data: Vec<u8>) -> Result<ReplyReceiver, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let correlation_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), reply_tx);

        let publish = self
            .pub_channel
            .basic_publish(
                "",
                &self.routing_key,
                BasicPublishOptions::default(),
                &data,
                BasicProperties::default()
                    .with_content_type("text/plain".into())
                    .with_correlation_id(correlation_id.as_str().into())
                    .with_reply_to(self.reply_queue.as_str().into()),
            )
            .await;

        if let Err(e) = publish {
            // The demultiplexer will never see this ID.
            self.pending.remove(&correlation_id);
            return Err(TransportError::PublishFailed {
                attempts: 1,
                source: e,
            });
        }

        if let Some(timeout) = self.options.request_timeout {
            let pending = Arc::clone(&self.pending);
            let correlation_id = correlation_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                // Whoever removes the entry owns the sender; dropping it
                // here closes the reply channel empty.
                if pending.remove(&correlation_id).is_some() {
                    debug!(correlation_id = %correlation_id, "request timed out, reply channel closed");
                }
            });
        }

        Ok(reply_rx)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_err = None;
        for result in [
            self.pub_channel.close(200, "client shutdown").await,
            self.sub_channel.close(200, "client shutdown").await,
            self.conn.close(200, "client shutdown").await,
        ] {
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        // The demultiplexer exits once its delivery stream ends; abort
        // covers the case where the stream outlives a failed close.
        let demux = self.demux.lock().expect("demux handle lock").take();
        if let Some(handle) = demux {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("reply demultiplexer task failed: {e}");
                }
            }
        }
        // Drop any senders still registered so waiters observe a closed
        // channel rather than hanging.
        self.pending.clear();

        match first_err {
            Some(e) => Err(TransportError::Broker(e)),
            None => Ok(()),
        }
    }
}

/// Consumes the reply queue and routes each delivery to the reply channel
/// registered under its correlation ID. Exactly one of the demultiplexer
/// and the timeout watcher wins the atomic remove, so the channel is
/// completed or closed exactly once.
async fn reply_demux(mut consumer: Consumer, pending: PendingReplies) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                debug!("reply consumer ended: {e}");
                break;
            }
        };

        let correlation_id = match delivery.properties.correlation_id() {
            Some(id) => id.as_str().to_string(),
            None => {
                debug!("reply without correlation id dropped");
                continue;
            }
        };

        match pending.remove(&correlation_id) {
            Some((_, reply_tx)) => {
                let _ = reply_tx.send(delivery.data);
            }
            None => {
                debug!(correlation_id = %correlation_id, "reply for unknown or completed request dropped");
            }
        }
    }
    debug!("reply demultiplexer stopped");
}
