//! OutboxEvent: a domain event persisted with the state change that produced it.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::outbox_events;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = outbox_events)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Bus topic: `moc.<aggregate>.<event>`, lower-cased.
    pub fn topic(&self) -> String {
        format!(
            "moc.{}.{}",
            self.aggregate_type.to_lowercase(),
            self.event_type.to_lowercase()
        )
    }

    /// Flip `published`; a second call keeps the first timestamp.
    pub fn mark_published(&mut self, at: DateTime<Utc>) {
        if !self.published {
            self.published = true;
            self.published_at = Some(at);
        }
    }
}
