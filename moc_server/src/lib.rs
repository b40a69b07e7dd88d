//! MagicOnCall control plane: multi-tenant incident response.
//!
//! Alerts arrive over REST or webhooks and are correlated into incidents. Responders
//! (or the AI triage) attach hypotheses and evidence, build a correlation graph,
//! and run diagnostic tools through policy-guarded actions. Every state change is
//! recorded in a timeline, an audit log and a transactional outbox.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod policy;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
pub mod tenant;
pub mod validation;

pub use routes::{router as build_app, AppState};
