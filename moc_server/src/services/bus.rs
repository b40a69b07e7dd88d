//! Event bus publishers used by the outbox relay.

use std::sync::Mutex;

use async_trait::async_trait;

/// Delivers one event to the external bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// Writes events to the log. Used when no bus is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        tracing::info!(topic, key, payload = %payload, "Event published");
        Ok(())
    }
}

/// POSTs `{topic, key, payload}` to an HTTP bus endpoint.
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "topic": topic,
            "key": key,
            "payload": payload,
        });

        let resp = self
            .client
            .post(&self.url)
            .header("User-Agent", "moc-outbox-relay")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("bus rejected {topic}: {status} {text}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

/// Records events in memory; can be told to fail from a given call on.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<PublishedEvent>>,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish once `n` events have been accepted.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn recover(&self) {
        *self.fail_after.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        let limit = *self.fail_after.lock().unwrap_or_else(|e| e.into_inner());
        if limit.is_some_and(|n| published.len() >= n) {
            anyhow::bail!("bus unavailable");
        }
        published.push(PublishedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Publisher for an optional bus URL.
pub fn from_url(url: Option<&str>) -> Box<dyn EventPublisher> {
    match url {
        Some(url) => {
            tracing::info!(url, "Publishing outbox events over HTTP");
            Box::new(HttpPublisher::new(url))
        }
        None => Box::new(LogPublisher),
    }
}
