//! AI triage: summarize evidence, ask the LLM for hypotheses, persist them.
//!
//! Results are memoized per `(tenant, evidence hash)` for the life of the
//! process; the same evidence never costs a second LLM call. Concurrent misses
//! on one key queue behind a per-key lock and recheck the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Hypothesis, HypothesisSource, IncidentEvent};
use crate::services::evidence_summarizer;
use crate::services::incident_service::{self, AddHypothesisRequest};
use crate::services::llm::{self, LlmClient, LlmRequest};
use crate::store::UnitOfWork;

const SYSTEM_PROMPT: &str = "\
You are an expert incident responder. Given the evidence collected so far for an incident,
generate a JSON array of hypothesis objects. Each hypothesis should have:
- title: concise name for the hypothesis
- description: detailed explanation
- confidence: a number between 0.0 and 1.0
- evidenceFor: evidence supporting this hypothesis
- evidenceAgainst: evidence contradicting this hypothesis
- nextBestTest: the single best action to confirm or refute this hypothesis
- stopCondition: the measurable condition that confirms the issue is resolved

Return ONLY a valid JSON array, no markdown fences or extra text.
";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResult {
    pub incident_id: Uuid,
    pub hypotheses: Vec<Hypothesis>,
    pub evidence_hash: String,
    pub tokens_used: usize,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedHypothesis {
    title: Option<String>,
    description: Option<String>,
    confidence: Option<f64>,
    evidence_for: Option<String>,
    evidence_against: Option<String>,
    next_best_test: Option<String>,
    stop_condition: Option<String>,
}

type CacheKey = (String, String);

pub struct TriageService {
    llm: Arc<dyn LlmClient>,
    token_budget: usize,
    cache: RwLock<HashMap<CacheKey, TriageResult>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

impl TriageService {
    pub fn new(llm: Arc<dyn LlmClient>, token_budget: usize) -> Self {
        Self {
            llm,
            token_budget,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<TriageResult> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn remember(&self, key: CacheKey, result: TriageResult) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result);
    }

    fn slot(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn release(&self, key: &CacheKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn from_cache(incident_id: Uuid, hit: TriageResult) -> TriageResult {
        tracing::info!(incident_id = %incident_id, hash = %hit.evidence_hash, "Triage cache hit");
        crate::metrics::triage_run("cached");
        TriageResult {
            incident_id,
            tokens_used: 0,
            cached: true,
            timestamp: Utc::now(),
            ..hit
        }
    }

    pub async fn triage(&self, uow: &mut dyn UnitOfWork, incident_id: Uuid) -> AppResult<TriageResult> {
        let incident = incident_service::find(uow, incident_id).await?;
        let summary = evidence_summarizer::summarize(uow, incident_id).await?;
        tracing::info!(
            incident_id = %incident_id,
            items = summary.items.len(),
            hash = %summary.evidence_hash,
            "Evidence summarized"
        );

        let key = (incident.tenant_id.clone(), summary.evidence_hash.clone());
        if let Some(hit) = self.cached(&key) {
            return Ok(Self::from_cache(incident_id, hit));
        }

        let slot = self.slot(&key);
        let _running = slot.lock().await;
        if let Some(hit) = self.cached(&key) {
            return Ok(Self::from_cache(incident_id, hit));
        }
        let result = self.generate(uow, &incident.tenant_id, incident_id, summary).await;
        if let Ok(result) = &result {
            self.remember(key.clone(), result.clone());
        }
        self.release(&key);
        result
    }

    async fn generate(
        &self,
        uow: &mut dyn UnitOfWork,
        tenant_id: &str,
        incident_id: Uuid,
        summary: evidence_summarizer::EvidenceSummary,
    ) -> AppResult<TriageResult> {
        let estimated = (SYSTEM_PROMPT.chars().count() + summary.formatted.chars().count()) / llm::CHARS_PER_TOKEN;
        if estimated > self.token_budget {
            tracing::warn!(estimated, budget = self.token_budget, "Token budget exceeded");
            crate::metrics::triage_run("budget_exceeded");
            return Err(AppError::TokenBudgetExceeded {
                estimated,
                budget: self.token_budget,
            });
        }

        let request = LlmRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: summary.formatted.clone(),
            max_tokens: self.token_budget,
        };
        let response = self.llm.complete(&request).await?;
        tracing::info!(incident_id = %incident_id, tokens = response.total_tokens(), model = %response.model, "LLM response received");

        let mut hypotheses = Vec::new();
        for parsed in parse_hypotheses(&response.content) {
            let Some(title) = parsed.title.filter(|t| !t.trim().is_empty()) else {
                tracing::warn!(incident_id = %incident_id, "Skipping untitled hypothesis from LLM");
                continue;
            };
            let request = AddHypothesisRequest {
                title: Some(title),
                description: parsed.description,
                confidence: parsed.confidence.map(|c| c.clamp(0.0, 1.0)),
                source: Some(HypothesisSource::Ai),
                evidence_for: parsed.evidence_for,
                evidence_against: parsed.evidence_against,
                next_best_test: parsed.next_best_test,
                stop_condition: parsed.stop_condition,
                evidence_hash: Some(summary.evidence_hash.clone()),
            };
            hypotheses.push(incident_service::add_hypothesis(uow, incident_id, request).await?);
        }

        uow.insert_event(&IncidentEvent::triage_completed(
            tenant_id,
            incident_id,
            hypotheses.len(),
        ))
        .await?;

        crate::metrics::triage_run("completed");
        crate::metrics::triage_tokens(response.total_tokens() as u64);

        let result = TriageResult {
            incident_id,
            hypotheses,
            evidence_hash: summary.evidence_hash,
            tokens_used: response.total_tokens(),
            cached: false,
            timestamp: Utc::now(),
        };

        tracing::info!(incident_id = %incident_id, count = result.hypotheses.len(), "Triage completed");
        Ok(result)
    }
}

/// Unparseable output counts as no hypotheses.
fn parse_hypotheses(content: &str) -> Vec<ParsedHypothesis> {
    match serde_json::from_str(llm::strip_fences(content)) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!("Failed to parse LLM response as hypothesis JSON: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::models::{EvidenceType, IncidentEventType, IncidentSeverity};
    use crate::services::incident_service::{AddEvidenceRequest, CreateIncidentRequest};
    use crate::services::llm::{LlmResponse, MockLlm};
    use crate::store::{MemoryStore, Scope, Store};
    use crate::tenant::TenantId;

    struct Counting {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl LlmClient for Counting {
        async fn complete(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = MockLlm.complete(request).await?;
            response.content = self.reply.to_string();
            Ok(response)
        }
    }

    async fn setup(store: &MemoryStore) -> (Box<dyn UnitOfWork>, Uuid) {
        let mut uow = store
            .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
            .await
            .unwrap();
        let incident = incident_service::create(
            uow.as_mut(),
            CreateIncidentRequest {
                external_id: Some("inc-1".into()),
                title: Some("Checkout errors".into()),
                summary: None,
                severity: Some(IncidentSeverity::Sev2),
                commander_name: None,
                tags: BTreeMap::new(),
            },
        )
        .await
        .unwrap();
        (uow, incident.id)
    }

    async fn add_log(uow: &mut dyn UnitOfWork, incident_id: Uuid, content: String) {
        incident_service::add_evidence(
            uow,
            incident_id,
            AddEvidenceRequest {
                hypothesis_id: None,
                evidence_type: Some(EvidenceType::Log),
                title: Some("app log".into()),
                content: Some(content),
                source_url: None,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn mock_triage_persists_ai_hypotheses() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        add_log(uow.as_mut(), incident_id, "connection timeout".into()).await;

        let service = TriageService::new(Arc::new(MockLlm), 4096);
        let result = service.triage(uow.as_mut(), incident_id).await.unwrap();
        assert!(!result.cached);
        assert!(result.tokens_used > 0);
        assert_eq!(result.hypotheses.len(), 3);
        assert!(result.hypotheses.iter().all(|h| h.source == HypothesisSource::Ai));
        assert_eq!(result.hypotheses[0].evidence_hash.as_deref(), Some(result.evidence_hash.as_str()));

        let events = uow.list_events(incident_id).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, IncidentEventType::TriageCompleted);
        assert_eq!(last.description, "AI triage completed: 3 hypotheses generated");
    }

    #[tokio::test]
    async fn same_evidence_hits_the_cache() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        add_log(uow.as_mut(), incident_id, "oom".into()).await;

        let llm = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "```json\n[{\"title\":\"Leak\",\"confidence\":1.7}]\n```",
        });
        let service = TriageService::new(llm.clone(), 4096);
        let first = service.triage(uow.as_mut(), incident_id).await.unwrap();
        assert_eq!(first.hypotheses.len(), 1);
        assert_eq!(first.hypotheses[0].confidence, 1.0);

        let second = service.triage(uow.as_mut(), incident_id).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.tokens_used, 0);
        assert_eq!(second.evidence_hash, first.evidence_hash);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(uow.list_hypotheses(incident_id).await.unwrap().len(), 1);

        add_log(uow.as_mut(), incident_id, "more".into()).await;
        let third = service.triage(uow.as_mut(), incident_id).await.unwrap();
        assert!(!third.cached);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn garbage_reply_yields_no_hypotheses() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        let llm = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "I think it's DNS",
        });
        let result = TriageService::new(llm, 4096)
            .triage(uow.as_mut(), incident_id)
            .await
            .unwrap();
        assert!(result.hypotheses.is_empty());
    }

    #[tokio::test]
    async fn oversized_evidence_exceeds_budget() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        for _ in 0..5 {
            add_log(uow.as_mut(), incident_id, "x".repeat(1900)).await;
        }
        let err = TriageService::new(Arc::new(MockLlm), 100)
            .triage(uow.as_mut(), incident_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_BUDGET_EXCEEDED");
        assert_eq!(err.status(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_incident_is_not_found() {
        let store = MemoryStore::new();
        let mut uow = store
            .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
            .await
            .unwrap();
        let err = TriageService::new(Arc::new(MockLlm), 4096)
            .triage(uow.as_mut(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn waiter_on_a_running_key_reuses_its_result() {
        let store = MemoryStore::new();
        let (mut uow, incident_id) = setup(&store).await;
        add_log(uow.as_mut(), incident_id, "disk full".into()).await;
        let hash = evidence_summarizer::summarize(uow.as_mut(), incident_id)
            .await
            .unwrap()
            .evidence_hash;
        uow.commit().await.unwrap();

        let llm = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "[]",
        });
        let service = Arc::new(TriageService::new(llm.clone(), 4096));
        let key = ("acme".to_string(), hash.clone());
        let slot = service.slot(&key);
        let running = slot.lock().await;

        let waiter = tokio::spawn({
            let service = service.clone();
            let store = store.clone();
            async move {
                let mut uow = store
                    .begin(Scope::Tenant(TenantId::parse("acme").unwrap()))
                    .await
                    .unwrap();
                service.triage(uow.as_mut(), incident_id).await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        service.remember(
            key,
            TriageResult {
                incident_id,
                hypotheses: Vec::new(),
                evidence_hash: hash,
                tokens_used: 42,
                cached: false,
                timestamp: Utc::now(),
            },
        );
        drop(running);

        let result = waiter.await.unwrap().unwrap();
        assert!(result.cached);
        assert_eq!(result.tokens_used, 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }
}
