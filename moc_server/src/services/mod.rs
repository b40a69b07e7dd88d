//! Control-plane services. Stateless operations are free functions over a
//! [`UnitOfWork`](crate::store::UnitOfWork); services holding clients or caches are structs.

pub mod action_service;
pub mod alert_service;
pub mod bus;
pub mod evidence_summarizer;
pub mod graph_service;
pub mod incident_service;
pub mod llm;
pub mod outbox;
pub mod pagerduty;
pub mod rate_limiter;
pub mod tool_executor;
pub mod tools;
pub mod triage_service;
pub mod webhook_service;
