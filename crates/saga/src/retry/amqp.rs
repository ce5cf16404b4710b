//! RabbitMQ retry transport.
//!
//! Queues are declared durable on first use, publishes are persistent and wait
//! for the broker's confirm, and each consumer holds at most one
//! unacknowledged delivery.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel,
    message::Delivery as AmqpDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};

use super::RetryQueue;
use super::transport::{Acknowledger, Delivery, DeliveryStream, RetryTransport, TransportError};

const POOL_SIZE: usize = 8;
const CONSUMER_TAG: &str = "library-gateway-retry";

/// [`RetryTransport`] over a pooled AMQP connection.
#[derive(Clone)]
pub struct AmqpTransport {
    pool: Pool,
}

impl std::fmt::Debug for AmqpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("pool_status", &self.pool.status())
            .finish()
    }
}

impl AmqpTransport {
    /// Connects to the broker at `url` and declares every retry queue.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to create pool: {e}")))?;

        let transport = Self { pool };
        let channel = transport.channel().await?;
        for queue in RetryQueue::ALL {
            declare(&channel, queue).await?;
        }

        tracing::info!("Connected to AMQP broker");
        Ok(transport)
    }

    async fn channel(&self) -> Result<Channel, TransportError> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            TransportError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;
        conn.create_channel()
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to create channel: {e}")))
    }
}

async fn declare(channel: &Channel, queue: RetryQueue) -> Result<(), TransportError> {
    channel
        .queue_declare(
            queue.name(),
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Subscribe(format!("Failed to declare {queue}: {e}")))?;
    Ok(())
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::Ack(e.to_string()))
    }
}

fn into_delivery(delivery: AmqpDelivery) -> Delivery {
    Delivery::new(
        delivery.data,
        Box::new(AmqpAcker {
            acker: delivery.acker,
        }),
    )
}

#[async_trait]
impl RetryTransport for AmqpTransport {
    #[tracing::instrument(name = "retry.publish", skip(self, payload), fields(queue = %queue))]
    async fn publish(&self, queue: RetryQueue, payload: Vec<u8>) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| TransportError::Publish(format!("Failed to enable confirms: {e}")))?;
        declare(&channel, queue).await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        let confirm = channel
            .basic_publish(
                "",
                queue.name(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| TransportError::Publish(format!("Failed to publish: {e}")))?
            .await
            .map_err(|e| TransportError::Publish(format!("Publish confirmation failed: {e}")))?;

        if confirm.is_nack() {
            return Err(TransportError::Publish(format!(
                "Broker rejected message for {queue}"
            )));
        }
        tracing::debug!("Published retry event");
        Ok(())
    }

    async fn subscribe(&self, queue: RetryQueue) -> Result<DeliveryStream, TransportError> {
        let channel = self.channel().await?;
        declare(&channel, queue).await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| TransportError::Subscribe(format!("Failed to set prefetch: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue.name(),
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Subscribe(format!("Failed to start consumer: {e}")))?;

        tracing::info!(queue = %queue, "Consumer connected");

        let deliveries = consumer.map(move |delivery| {
            // The channel must outlive its consumer.
            let _channel = &channel;
            delivery
                .map(into_delivery)
                .map_err(|e| TransportError::Connection(format!("Consumer error: {e}")))
        });
        Ok(deliveries.boxed())
    }
}
