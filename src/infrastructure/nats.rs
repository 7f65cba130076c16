//! Event publishers

use async_trait::async_trait;
use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::{FulfillmentError, Result};

/// Publishes each event as JSON on its `fulfillment.*` subject.
#[derive(Clone)]
pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await.map_err(|e| FulfillmentError::Publish(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.client.publish(event.subject(), payload.into()).await.map_err(|e| FulfillmentError::Publish(e.to_string()))
    }
}

/// Used when no bus is configured: events only reach the log.
#[derive(Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        tracing::debug!(subject = %event.subject(), ?event, "domain event");
        Ok(())
    }
}
