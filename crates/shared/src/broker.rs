//! Broker plumbing on top of lapin
//!
//! One connection and one channel per process. Queues are declared durable
//! and messages published persistent, so intents survive a broker restart.
//! The [`Publisher`] trait is the seam that lets loop tests run without a
//! live broker.

use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use outreach_core::PipelineError;

/// Header carrying the worker-side redelivery count. Absent means zero.
pub const RETRIES_HEADER: &str = "x-retries";

/// Something that can ship a payload to a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8], retries: i64)
    -> Result<(), PipelineError>;
}

/// Process-wide broker handle: one connection, one channel.
///
/// The channel is not shared across concurrency boundaries; each service
/// loop owns its broker handle for its lifetime.
pub struct Broker {
    _connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect and open the process channel.
    pub async fn connect(url: &str) -> Result<Self, PipelineError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("failed to connect: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::Broker(format!("failed to open channel: {e}")))?;

        tracing::info!("broker channel established");

        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Declare a durable queue. Idempotent on the broker side.
    pub async fn declare_queue(&self, topic: &str) -> Result<(), PipelineError> {
        self.channel
            .queue_declare(
                topic,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("failed to declare queue {topic}: {e}")))?;
        Ok(())
    }

    /// Create a manual-ack consumer with prefetch 1.
    pub async fn consumer(&self, topic: &str, tag: &str) -> Result<Consumer, PipelineError> {
        self.declare_queue(topic).await?;
        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("failed to set prefetch: {e}")))?;
        self.channel
            .basic_consume(
                topic,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("failed to consume {topic}: {e}")))
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retries: i64,
    ) -> Result<(), PipelineError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type(ShortString::from("application/json"));
        if retries > 0 {
            properties = properties.with_headers(retry_headers(retries));
        }

        self.channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("publish to {topic} failed: {e}")))?
            .await
            .map_err(|e| PipelineError::Broker(format!("publish to {topic} not confirmed: {e}")))?;

        Ok(())
    }
}

/// Read the redelivery count from message properties. Absent header or an
/// unexpected value type both count as zero.
pub fn retry_count(properties: &BasicProperties) -> i64 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from(RETRIES_HEADER)))
        .map(|value| match value {
            AMQPValue::ShortShortInt(n) => i64::from(*n),
            AMQPValue::ShortShortUInt(n) => i64::from(*n),
            AMQPValue::ShortInt(n) => i64::from(*n),
            AMQPValue::ShortUInt(n) => i64::from(*n),
            AMQPValue::LongInt(n) => i64::from(*n),
            AMQPValue::LongUInt(n) => i64::from(*n),
            AMQPValue::LongLongInt(n) => *n,
            _ => 0,
        })
        .unwrap_or(0)
}

/// Build the header table for a republished message.
pub fn retry_headers(retries: i64) -> FieldTable {
    let mut table = FieldTable::default();
    table.insert(
        ShortString::from(RETRIES_HEADER),
        AMQPValue::LongLongInt(retries),
    );
    table
}
