//! Render an incident's evidence as Markdown for the LLM and content-address it.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::Evidence;
use crate::store::UnitOfWork;

const MAX_CONTENT_CHARS: usize = 2000;
const TRUNCATION_MARKER: &str = "... [truncated]";
const EMPTY_SUMMARY: &str = "No evidence collected yet.";

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceItem {
    pub evidence_type: String,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceSummary {
    pub items: Vec<EvidenceItem>,
    pub formatted: String,
    pub evidence_hash: String,
}

impl EvidenceSummary {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Load evidence newest first and summarize it.
pub async fn summarize(uow: &mut dyn UnitOfWork, incident_id: Uuid) -> AppResult<EvidenceSummary> {
    let evidence = uow.list_evidence(incident_id).await?;
    Ok(summarize_items(&evidence))
}

pub fn summarize_items(evidence: &[Evidence]) -> EvidenceSummary {
    let items: Vec<EvidenceItem> = evidence
        .iter()
        .map(|e| EvidenceItem {
            evidence_type: e.evidence_type.to_string(),
            title: e.title.clone(),
            content: e.content.as_deref().map(truncate),
        })
        .collect();

    let formatted = format_items(&items);
    let evidence_hash = sha256_hex(&formatted);
    EvidenceSummary {
        items,
        formatted,
        evidence_hash,
    }
}

fn truncate(content: &str) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content.to_string(),
    }
}

/// Groups by type in first-seen order.
fn format_items(items: &[EvidenceItem]) -> String {
    if items.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    let mut groups: Vec<(&str, Vec<&EvidenceItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(t, _)| *t == item.evidence_type) {
            Some((_, members)) => members.push(item),
            None => groups.push((&item.evidence_type, vec![item])),
        }
    }

    let mut out = String::new();
    for (evidence_type, members) in groups {
        out.push_str("## ");
        out.push_str(evidence_type);
        out.push('\n');
        for item in members {
            out.push_str("- **");
            out.push_str(&item.title);
            out.push_str("**: ");
            out.push_str(item.content.as_deref().unwrap_or("(no content)"));
            out.push('\n');
        }
        out.push('\n');
    }
    out.trim().to_string()
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
