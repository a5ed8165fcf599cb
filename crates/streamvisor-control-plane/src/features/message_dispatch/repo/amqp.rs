//! AMQP transport over lapin: pooled connections and channels, the
//! acknowledgment publisher and the control-queue consumer.

use super::{AckPublisher, ControlSource, InboundDelivery};
use crate::shared::config::{BrokerConfig, QueueNames};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streamvisor_core::{AckMessage, AckQueue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared broker connections plus a bounded set of reusable channels.
///
/// At most `channel_pool` channels are checked out at once; a caller past
/// that limit waits until a [`PooledChannel`] is dropped.
pub struct BrokerPool {
    uri: AMQPUri,
    connections: tokio::sync::Mutex<Vec<Connection>>,
    next_connection: AtomicUsize,
    idle: Mutex<Vec<Channel>>,
    permits: Arc<Semaphore>,
}

impl BrokerPool {
    pub async fn connect(config: &BrokerConfig) -> ControlPlaneResult<Arc<Self>> {
        let uri = config.amqp_uri();
        let size = config.connection_pool.max(1);

        let mut connections = Vec::with_capacity(size);
        for index in 0..size {
            connections.push(open_connection(&uri, index).await?);
        }

        info!(
            host = %config.host,
            port = config.port,
            connections = size,
            channels = config.channel_pool,
            "Connected to broker"
        );

        Ok(Arc::new(Self {
            uri,
            connections: tokio::sync::Mutex::new(connections),
            next_connection: AtomicUsize::new(0),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(config.channel_pool.max(1))),
        }))
    }

    /// Open a channel outside the pool limit, for long-lived consumers.
    pub async fn create_channel(&self) -> ControlPlaneResult<Channel> {
        let mut connections = self.connections.lock().await;
        if connections.is_empty() {
            return Err(ControlPlaneError::BrokerError(
                "broker pool is closed".to_string(),
            ));
        }

        let index = self.next_connection.fetch_add(1, Ordering::Relaxed) % connections.len();
        if !connections[index].status().connected() {
            warn!(connection = index, "Broker connection lost, reconnecting");
            connections[index] = open_connection(&self.uri, index).await?;
        }

        connections[index]
            .create_channel()
            .await
            .map_err(|e| ControlPlaneError::BrokerError(format!("channel creation failed: {e}")))
    }

    pub async fn acquire(self: &Arc<Self>) -> ControlPlaneResult<PooledChannel> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ControlPlaneError::BrokerError("channel pool is closed".to_string()))?;

        let channel = match self.take_idle() {
            Some(channel) => channel,
            None => self.create_channel().await?,
        };

        Ok(PooledChannel {
            channel,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn take_idle(&self) -> Option<Channel> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(channel) = idle.pop() {
            if channel.status().connected() {
                return Some(channel);
            }
        }
        None
    }

    fn release(&self, channel: Channel) {
        if !channel.status().connected() {
            debug!("Discarding closed channel");
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(channel);
        }
    }

    pub async fn close(&self) {
        self.permits.close();
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }

        let mut connections = self.connections.lock().await;
        for (index, connection) in connections.drain(..).enumerate() {
            if let Err(e) = connection.close(200, "shutdown").await {
                warn!(connection = index, error = %e, "Failed to close broker connection");
            }
        }
        info!("Broker pool closed");
    }
}

async fn open_connection(uri: &AMQPUri, index: usize) -> ControlPlaneResult<Connection> {
    Connection::connect_uri(
        uri.clone(),
        ConnectionProperties::default()
            .with_connection_name(format!("streamvisor-control-plane-{index}").into()),
    )
    .await
    .map_err(|e| ControlPlaneError::BrokerError(format!("connection failed: {e}")))
}

/// Channel checked out of a [`BrokerPool`]; returned on drop.
pub struct PooledChannel {
    channel: Channel,
    pool: Arc<BrokerPool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        self.pool.release(self.channel.clone());
    }
}

pub struct AmqpAckPublisher {
    pool: Arc<BrokerPool>,
    queues: QueueNames,
}

impl AmqpAckPublisher {
    pub fn new(pool: Arc<BrokerPool>, queues: QueueNames) -> Self {
        Self { pool, queues }
    }

    /// Declare the durable exchange and both ack queues, each bound under
    /// its own name.
    pub async fn declare_topology(&self) -> ControlPlaneResult<()> {
        let channel = self.pool.acquire().await?;

        channel
            .exchange_declare(
                &self.queues.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for queue in [&self.queues.status_ack, &self.queues.delete_ack] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(
                    queue,
                    &self.queues.exchange,
                    queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        info!(
            exchange = %self.queues.exchange,
            status_queue = %self.queues.status_ack,
            delete_queue = %self.queues.delete_ack,
            "Acknowledgment topology declared"
        );
        Ok(())
    }

    fn routing_key(&self, queue: AckQueue) -> &str {
        match queue {
            AckQueue::Status => &self.queues.status_ack,
            AckQueue::Delete => &self.queues.delete_ack,
        }
    }
}

#[async_trait]
impl AckPublisher for AmqpAckPublisher {
    async fn publish(&self, ack: &AckMessage) -> ControlPlaneResult<()> {
        let body = ack.to_bytes()?;
        let routing_key = self.routing_key(ack.queue());
        let channel = self.pool.acquire().await?;

        let confirm = channel
            .basic_publish(
                &self.queues.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| {
                ControlPlaneError::BrokerError(format!("publish to {routing_key} failed: {e}"))
            })?;

        confirm.await.map_err(|e| {
            ControlPlaneError::BrokerError(format!(
                "publish confirmation from {routing_key} failed: {e}"
            ))
        })?;

        info!(device_id = %ack.device_id(), queue = %routing_key, "Acknowledgment published");
        Ok(())
    }
}

/// Consumer on the durable control queue.
///
/// Holds its own channel for the lifetime of the consumer; the prefetch
/// limit set on it bounds unacknowledged deliveries.
pub struct AmqpControlSource {
    _channel: Channel,
    consumer: Consumer,
}

impl AmqpControlSource {
    pub async fn open(pool: &BrokerPool, queue: &str, prefetch: u16) -> ControlPlaneResult<Self> {
        let channel = pool.create_channel().await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = format!("streamvisor-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue, prefetch, consumer_tag = %consumer_tag, "Consuming control queue");
        Ok(Self {
            _channel: channel,
            consumer,
        })
    }
}

#[async_trait]
impl ControlSource for AmqpControlSource {
    type Delivery = Delivery;

    async fn next_delivery(&mut self) -> Option<ControlPlaneResult<Delivery>> {
        self.consumer
            .next()
            .await
            .map(|delivery| delivery.map_err(ControlPlaneError::from))
    }
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    async fn ack(&self) -> ControlPlaneResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(ControlPlaneError::from)
    }

    async fn reject(&self) -> ControlPlaneResult<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(ControlPlaneError::from)
    }

    async fn requeue(&self) -> ControlPlaneResult<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(ControlPlaneError::from)
    }
}
