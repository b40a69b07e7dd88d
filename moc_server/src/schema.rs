//! Diesel table definitions for the control plane.
//!
//! Tables: alerts, incidents, incident_events, hypotheses, evidence, actions,
//! tool_execution_logs, audit_logs, correlation_nodes, correlation_edges, outbox_events.
//! Every table carries tenant_id; reads filter on it.

diesel::table! {
    alerts (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        external_id -> Varchar,
        title -> Varchar,
        description -> Nullable<Text>,
        source -> Varchar,
        severity -> Varchar,
        status -> Varchar,
        labels -> Jsonb,
        policy_decision_reason -> Nullable<Text>,
        incident_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    incidents (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        external_id -> Varchar,
        title -> Varchar,
        summary -> Nullable<Text>,
        severity -> Varchar,
        status -> Varchar,
        commander_name -> Nullable<Varchar>,
        channel_id -> Nullable<Varchar>,
        tags -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    incident_events (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        event_type -> Varchar,
        description -> Text,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    hypotheses (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        status -> Varchar,
        confidence -> Float8,
        source -> Varchar,
        evidence_for -> Nullable<Text>,
        evidence_against -> Nullable<Text>,
        next_best_test -> Nullable<Text>,
        stop_condition -> Nullable<Text>,
        evidence_hash -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    evidence (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        hypothesis_id -> Nullable<Uuid>,
        evidence_type -> Varchar,
        title -> Varchar,
        content -> Nullable<Text>,
        source_url -> Nullable<Varchar>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    actions (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        status -> Varchar,
        action_type -> Varchar,
        risk_level -> Varchar,
        tool_name -> Varchar,
        tool_parameters -> Jsonb,
        idempotency_key -> Nullable<Varchar>,
        requires_approval -> Bool,
        approved_by -> Nullable<Varchar>,
        approved_at -> Nullable<Timestamptz>,
        rejected_by -> Nullable<Varchar>,
        rejected_at -> Nullable<Timestamptz>,
        rejection_reason -> Nullable<Text>,
        policy_decision_reason -> Nullable<Text>,
        policy_applied_rules -> Nullable<Varchar>,
        retry_count -> Int4,
        max_retries -> Int4,
        tool_execution_id -> Nullable<Uuid>,
        last_error -> Nullable<Text>,
        proposed_by -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    tool_execution_logs (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        tool_name -> Varchar,
        incident_id -> Nullable<Uuid>,
        status -> Varchar,
        request_payload -> Jsonb,
        response_content -> Nullable<Text>,
        error_message -> Nullable<Text>,
        duration_ms -> Int8,
        retry_count -> Int4,
        requested_by -> Varchar,
        executed_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    audit_logs (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        entity_type -> Varchar,
        entity_id -> Uuid,
        action -> Varchar,
        previous_state -> Nullable<Jsonb>,
        new_state -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    correlation_nodes (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        node_type -> Varchar,
        label -> Varchar,
        description -> Nullable<Text>,
        reference_id -> Nullable<Uuid>,
        source -> Nullable<Varchar>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    correlation_edges (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        incident_id -> Uuid,
        source_node_id -> Uuid,
        target_node_id -> Uuid,
        edge_type -> Varchar,
        weight -> Float8,
        reason -> Nullable<Text>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
        created_by -> Varchar,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        event_type -> Varchar,
        aggregate_type -> Varchar,
        aggregate_id -> Varchar,
        tenant_id -> Varchar,
        payload -> Jsonb,
        created_at -> Timestamptz,
        published -> Bool,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    alerts,
    incidents,
    incident_events,
    hypotheses,
    evidence,
    actions,
    tool_execution_logs,
    audit_logs,
    correlation_nodes,
    correlation_edges,
    outbox_events,
);
