//! Event publishers shipped with the engine.

use anyhow::Context;
use async_trait::async_trait;
use sb_core::{Event, EventPublisher};
use tokio::sync::mpsc;

/// Writes every event to the log. Used when no bus is configured.
#[derive(Debug, Clone, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        tracing::info!(
            action = %event.action,
            target = %event.target,
            actor = %event.actor_username,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Forwards events into a bounded channel drained by a bus worker.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    tx: mpsc::Sender<Event>,
}

impl ChannelEventPublisher {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        self.tx.send(event).await.context("event channel closed")
    }
}
