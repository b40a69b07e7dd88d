//! Transactional outbox: the writer appends inside the caller's unit of work,
//! the relay drains unpublished rows to the bus on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::AppResult;
use crate::events::DomainEvent;
use crate::services::bus::EventPublisher;
use crate::store::{Scope, Store, StoreResult, UnitOfWork};

/// Append `event` for the unit's tenant. Commits or rolls back with the
/// state change that produced it.
pub async fn append(uow: &mut dyn UnitOfWork, event: DomainEvent) -> AppResult<()> {
    let tenant = uow.tenant()?.to_string();
    let row = event.into_outbox(&tenant)?;
    tracing::debug!(event_type = %row.event_type, aggregate_id = %row.aggregate_id, "Outbox event appended");
    uow.insert_outbox(&row).await?;
    Ok(())
}

pub struct OutboxRelay {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>, batch_size: i64) -> Self {
        Self {
            store,
            publisher,
            batch_size,
        }
    }

    /// Publish one batch in creation order, stopping at the first failure.
    /// Returns how many events were published.
    ///
    /// The batch is read and marked in two short units of work; no lock or
    /// transaction is held while the bus is called. A crash between publish and
    /// mark republishes the event on the next pass.
    pub async fn relay_once(&self) -> StoreResult<usize> {
        let events = {
            let mut uow = self.store.begin(Scope::System).await?;
            uow.list_unpublished(self.batch_size).await?
        };
        if events.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = events.len(), "Outbox relay found unpublished events");

        let mut delivered = Vec::with_capacity(events.len());
        for event in events {
            let topic = event.topic();
            match self
                .publisher
                .publish(&topic, &event.aggregate_id, &event.payload)
                .await
            {
                Ok(()) => delivered.push(event.id),
                Err(e) => {
                    tracing::error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Failed to publish outbox event"
                    );
                    crate::metrics::outbox_publish_failed();
                    break;
                }
            }
        }

        if !delivered.is_empty() {
            let mut uow = self.store.begin(Scope::System).await?;
            let now = Utc::now();
            for id in &delivered {
                uow.mark_published(*id, now).await?;
            }
            uow.commit().await?;
        }
        crate::metrics::outbox_published(delivered.len() as u64);
        Ok(delivered.len())
    }

    /// Run forever. Spawned as a background tokio task.
    pub async fn run(self, interval: Duration) {
        tracing::info!(interval_ms = interval.as_millis() as u64, batch = self.batch_size, "Outbox relay started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.relay_once().await {
                tracing::error!("Outbox relay error: {e}");
            }
        }
    }
}
