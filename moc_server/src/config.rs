//! Control-plane configuration, loaded from environment variables.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::policy::action_policy::{parse_allowlist, ActionPolicyConfig};

#[derive(Clone, Debug)]
pub struct MocConfig {
    /// Accepted `X-Api-Key` values.
    pub api_keys: BTreeSet<String>,
    pub action_policy: ActionPolicyConfig,
    pub llm: LlmConfig,
    pub outbox: OutboxConfig,
    pub tools: ToolConfig,
    /// Shared secret for PagerDuty webhook signatures; empty disables the check.
    pub pagerduty_webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// `false` selects the deterministic mock client.
    pub enabled: bool,
    pub token_budget: usize,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// HTTP bus endpoint. `None` logs events instead of sending them.
    pub bus_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ToolConfig {
    /// Deadline for one tool call including all retries.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_wait: Duration,
    /// Tokens per second per (tool, tenant); 0 disables rate limiting.
    pub rate_per_sec: u64,
    pub burst: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_budget: 4096,
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
            bus_url: None,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            max_attempts: 3,
            retry_wait: Duration::from_millis(500),
            rate_per_sec: 0,
            burst: 10,
        }
    }
}

impl Default for MocConfig {
    fn default() -> Self {
        Self {
            api_keys: parse_allowlist("dev-api-key"),
            action_policy: ActionPolicyConfig::default(),
            llm: LlmConfig::default(),
            outbox: OutboxConfig::default(),
            tools: ToolConfig::default(),
            pagerduty_webhook_secret: String::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl MocConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_keys = std::env::var("MOC_API_KEYS")
            .map(|s| parse_allowlist(&s))
            .unwrap_or(defaults.api_keys);

        let action_policy = ActionPolicyConfig {
            tool_allowlist: std::env::var("MOC_ACTION_ALLOWED_TOOLS")
                .map(|s| parse_allowlist(&s))
                .unwrap_or(defaults.action_policy.tool_allowlist),
            max_scaling_limit: env_parse("MOC_ACTION_MAX_SCALING")
                .unwrap_or(defaults.action_policy.max_scaling_limit),
            rollback_requires_approval: env_parse("MOC_ACTION_ROLLBACK_REQUIRES_APPROVAL")
                .unwrap_or(defaults.action_policy.rollback_requires_approval),
        };

        let llm = LlmConfig {
            enabled: env_parse("MOC_LLM_ENABLED").unwrap_or(defaults.llm.enabled),
            token_budget: env_parse("MOC_LLM_TOKEN_BUDGET").unwrap_or(defaults.llm.token_budget),
            api_url: std::env::var("MOC_LLM_API_URL").unwrap_or(defaults.llm.api_url),
            api_key: std::env::var("MOC_LLM_API_KEY").unwrap_or_default(),
            model: std::env::var("MOC_LLM_MODEL").unwrap_or(defaults.llm.model),
        };

        let outbox = OutboxConfig {
            poll_interval: env_parse("MOC_OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox.poll_interval),
            batch_size: env_parse("MOC_OUTBOX_BATCH_SIZE").unwrap_or(defaults.outbox.batch_size),
            bus_url: std::env::var("MOC_BUS_URL").ok().filter(|s| !s.trim().is_empty()),
        };

        let tools = ToolConfig {
            timeout: env_parse("MOC_TOOL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tools.timeout),
            max_attempts: env_parse("MOC_TOOL_MAX_ATTEMPTS").unwrap_or(defaults.tools.max_attempts),
            retry_wait: env_parse("MOC_TOOL_RETRY_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tools.retry_wait),
            rate_per_sec: env_parse("MOC_TOOL_RATE_PER_SEC").unwrap_or(defaults.tools.rate_per_sec),
            burst: env_parse("MOC_TOOL_BURST").unwrap_or(defaults.tools.burst),
        };

        let pagerduty_webhook_secret =
            std::env::var("MOC_PAGERDUTY_WEBHOOK_SECRET").unwrap_or_default();

        if api_keys.contains("dev-api-key") {
            tracing::warn!("MOC_API_KEYS not set -- accepting the development key");
        }
        if pagerduty_webhook_secret.is_empty() {
            tracing::warn!("MOC_PAGERDUTY_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if llm.enabled && llm.api_key.is_empty() {
            tracing::warn!("MOC_LLM_ENABLED is set but MOC_LLM_API_KEY is empty");
        }

        Self {
            api_keys,
            action_policy,
            llm,
            outbox,
            tools,
            pagerduty_webhook_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MocConfig::default();
        assert!(config.api_keys.contains("dev-api-key"));
        assert_eq!(config.llm.token_budget, 4096);
        assert!(!config.llm.enabled);
        assert_eq!(config.outbox.poll_interval, Duration::from_secs(1));
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.tools.max_attempts, 3);
        assert_eq!(config.tools.timeout, Duration::from_secs(30));
        assert_eq!(config.action_policy.max_scaling_limit, 10);
    }
}
