use crate::types::IntroEvent;
use anyhow::Result;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IntroEvent) -> Result<()>;
}

/// Publish after commit, log-and-drop on failure. A notification that
/// cannot be delivered must never unwind a committed billing transaction.
pub async fn publish_or_log<P: EventPublisher + ?Sized>(publisher: &P, event: IntroEvent) {
    let kind = event.kind();
    let key = event.key();
    if let Err(err) = publisher.publish(event).await {
        warn!(
            event = kind,
            key = %key,
            error = %err,
            "failed to publish event, dropping"
        );
    }
}

#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl std::fmt::Debug for KafkaEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventPublisher")
            .field("topic", &self.topic)
            .finish()
    }
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("linger.ms", "10")
            .set("compression.type", "snappy")
            .set("acks", "all")
            .set("retries", "10")
            .create()?;

        Ok(Self { producer, topic })
    }

    pub fn from_producer(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }

    async fn send_event(&self, event: &IntroEvent) -> Result<()> {
        let key = event.key();
        let payload = serde_json::to_vec(event)?;

        let enqueue = || async {
            let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

            match self.producer.send(record, Duration::from_secs(5)).await {
                Ok((partition, offset)) => {
                    debug!(
                        event = event.kind(),
                        key = %key,
                        partition = partition,
                        offset = offset,
                        topic = %self.topic,
                        "published event"
                    );
                    Ok(())
                }
                Err((err, _)) => {
                    error!(
                        event = event.kind(),
                        key = %key,
                        topic = %self.topic,
                        error = %err,
                        "failed to publish event"
                    );
                    Err(anyhow::anyhow!("failed to publish event: {err}"))
                }
            }
        };

        enqueue
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_secs(5))
                    .with_max_times(3),
            )
            .notify(|err: &anyhow::Error, dur: Duration| {
                info!("Retrying event publish {:?} after {:?}", err, dur);
            })
            .await
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: IntroEvent) -> Result<()> {
        self.send_event(&event).await
    }
}

/// Test double that records everything it is asked to publish.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<IntroEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<IntroEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_of_kind(&self, kind: &str) -> Vec<IntroEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: IntroEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
