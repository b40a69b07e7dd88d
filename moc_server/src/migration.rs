//! Schema migration for the control-plane tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for every control-plane table.
///
/// Idempotent; executed on each start. Uniqueness keys are scoped by tenant.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Incident response control plane
-- ================================================================

CREATE TABLE IF NOT EXISTS incidents (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    external_id     VARCHAR(255) NOT NULL,
    title           VARCHAR(512) NOT NULL,
    summary         TEXT,
    severity        VARCHAR(16) NOT NULL,
    status          VARCHAR(32) NOT NULL DEFAULT 'NEW',
    commander_name  VARCHAR(255),
    channel_id      VARCHAR(255),
    tags            JSONB NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system',
    UNIQUE (tenant_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_incidents_tenant_status ON incidents (tenant_id, status);

CREATE TABLE IF NOT EXISTS alerts (
    id                      UUID PRIMARY KEY,
    tenant_id               VARCHAR(128) NOT NULL,
    external_id             VARCHAR(255) NOT NULL,
    title                   VARCHAR(512) NOT NULL,
    description             TEXT,
    source                  VARCHAR(128) NOT NULL,
    severity                VARCHAR(16) NOT NULL,
    status                  VARCHAR(16) NOT NULL DEFAULT 'OPEN',
    labels                  JSONB NOT NULL DEFAULT '{}',
    policy_decision_reason  TEXT,
    incident_id             UUID REFERENCES incidents(id),
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version                 BIGINT NOT NULL DEFAULT 0,
    created_by              VARCHAR(255) NOT NULL DEFAULT 'system',
    UNIQUE (tenant_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_alerts_tenant_status ON alerts (tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_alerts_incident ON alerts (incident_id);

CREATE TABLE IF NOT EXISTS incident_events (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    incident_id     UUID NOT NULL REFERENCES incidents(id),
    event_type      VARCHAR(32) NOT NULL,
    description     TEXT NOT NULL,
    metadata        JSONB NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_incident_events_incident ON incident_events (incident_id, created_at);

CREATE TABLE IF NOT EXISTS hypotheses (
    id                UUID PRIMARY KEY,
    tenant_id         VARCHAR(128) NOT NULL,
    incident_id       UUID NOT NULL REFERENCES incidents(id),
    title             VARCHAR(512) NOT NULL,
    description       TEXT,
    status            VARCHAR(16) NOT NULL DEFAULT 'PROPOSED',
    confidence        DOUBLE PRECISION NOT NULL DEFAULT 0,
    source            VARCHAR(16) NOT NULL,
    evidence_for      TEXT,
    evidence_against  TEXT,
    next_best_test    TEXT,
    stop_condition    TEXT,
    evidence_hash     VARCHAR(64),
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version           BIGINT NOT NULL DEFAULT 0,
    created_by        VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_hypotheses_incident ON hypotheses (incident_id);

CREATE TABLE IF NOT EXISTS evidence (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    incident_id     UUID NOT NULL REFERENCES incidents(id),
    hypothesis_id   UUID REFERENCES hypotheses(id),
    evidence_type   VARCHAR(16) NOT NULL,
    title           VARCHAR(512) NOT NULL,
    content         TEXT,
    source_url      VARCHAR(2048),
    metadata        JSONB NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_evidence_incident ON evidence (incident_id);

CREATE TABLE IF NOT EXISTS actions (
    id                      UUID PRIMARY KEY,
    tenant_id               VARCHAR(128) NOT NULL,
    incident_id             UUID NOT NULL REFERENCES incidents(id),
    title                   VARCHAR(512) NOT NULL,
    description             TEXT,
    status                  VARCHAR(16) NOT NULL,
    action_type             VARCHAR(16) NOT NULL,
    risk_level              VARCHAR(16) NOT NULL,
    tool_name               VARCHAR(128) NOT NULL,
    tool_parameters         JSONB NOT NULL DEFAULT '{}',
    idempotency_key         VARCHAR(255),
    requires_approval       BOOLEAN NOT NULL DEFAULT FALSE,
    approved_by             VARCHAR(255),
    approved_at             TIMESTAMPTZ,
    rejected_by             VARCHAR(255),
    rejected_at             TIMESTAMPTZ,
    rejection_reason        TEXT,
    policy_decision_reason  TEXT,
    policy_applied_rules    VARCHAR(512),
    retry_count             INTEGER NOT NULL DEFAULT 0,
    max_retries             INTEGER NOT NULL DEFAULT 3,
    tool_execution_id       UUID,
    last_error              TEXT,
    proposed_by             VARCHAR(255) NOT NULL,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version                 BIGINT NOT NULL DEFAULT 0,
    created_by              VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_actions_incident ON actions (incident_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_idempotency
    ON actions (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS tool_execution_logs (
    id                UUID PRIMARY KEY,
    tenant_id         VARCHAR(128) NOT NULL,
    tool_name         VARCHAR(128) NOT NULL,
    incident_id       UUID,
    status            VARCHAR(16) NOT NULL,
    request_payload   JSONB NOT NULL DEFAULT '{}',
    response_content  TEXT,
    error_message     TEXT,
    duration_ms       BIGINT NOT NULL DEFAULT 0,
    retry_count       INTEGER NOT NULL DEFAULT 0,
    requested_by      VARCHAR(255) NOT NULL,
    executed_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version           BIGINT NOT NULL DEFAULT 0,
    created_by        VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_tool_logs_tenant_tool ON tool_execution_logs (tenant_id, tool_name);

CREATE TABLE IF NOT EXISTS audit_logs (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    incident_id     UUID NOT NULL,
    entity_type     VARCHAR(64) NOT NULL,
    entity_id       UUID NOT NULL,
    action          VARCHAR(32) NOT NULL,
    previous_state  JSONB,
    new_state       JSONB,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs (entity_type, entity_id);

CREATE TABLE IF NOT EXISTS correlation_nodes (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    incident_id     UUID NOT NULL REFERENCES incidents(id),
    node_type       VARCHAR(32) NOT NULL,
    label           VARCHAR(512) NOT NULL,
    description     TEXT,
    reference_id    UUID,
    source          VARCHAR(128),
    metadata        JSONB NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_correlation_nodes_incident ON correlation_nodes (incident_id);
CREATE INDEX IF NOT EXISTS idx_correlation_nodes_reference ON correlation_nodes (incident_id, reference_id);

CREATE TABLE IF NOT EXISTS correlation_edges (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    incident_id     UUID NOT NULL REFERENCES incidents(id),
    source_node_id  UUID NOT NULL REFERENCES correlation_nodes(id),
    target_node_id  UUID NOT NULL REFERENCES correlation_nodes(id),
    edge_type       VARCHAR(32) NOT NULL,
    weight          DOUBLE PRECISION NOT NULL CHECK (weight > 0 AND weight <= 1),
    reason          TEXT,
    metadata        JSONB NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version         BIGINT NOT NULL DEFAULT 0,
    created_by      VARCHAR(255) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_correlation_edges_incident ON correlation_edges (incident_id);

CREATE TABLE IF NOT EXISTS outbox_events (
    id              UUID PRIMARY KEY,
    event_type      VARCHAR(64) NOT NULL,
    aggregate_type  VARCHAR(64) NOT NULL,
    aggregate_id    VARCHAR(128) NOT NULL,
    tenant_id       VARCHAR(128) NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published       BOOLEAN NOT NULL DEFAULT FALSE,
    published_at    TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_outbox_unpublished ON outbox_events (created_at) WHERE published = FALSE;
"#;

/// Run the control-plane migration (creates all tables).
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL).await?;
    Ok(())
}
