//! Control-plane data models: flat rows linked by id, stamped with a tenant.

/// Error returned when a status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a string-backed enum that serializes as its upper-case name,
/// parses case-insensitively and maps onto a `VARCHAR` column.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            serde::Serialize,
            serde::Deserialize,
            diesel::AsExpression,
            diesel::FromSqlRow,
        )]
        #[diesel(sql_type = diesel::sql_types::Text)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::models::UnknownVariant {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                <str as diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg>>::to_sql(
                    self.as_str(),
                    out,
                )
            }
        }

        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
                let raw = <String as diesel::deserialize::FromSql<
                    diesel::sql_types::Text,
                    diesel::pg::Pg,
                >>::from_sql(bytes)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

pub mod action;
pub mod alert;
pub mod audit;
pub mod evidence;
pub mod graph;
pub mod hypothesis;
pub mod incident;
pub mod outbox;
pub mod timeline;
pub mod tool_log;

pub use action::{Action, ActionDraft, ActionStatus, ActionType, InvalidActionTransition, RiskLevel};
pub use alert::{Alert, AlertSeverity, AlertStatus};
pub use audit::{AuditAction, AuditLog};
pub use evidence::{Evidence, EvidenceType};
pub use graph::{CorrelationEdge, CorrelationNode, EdgeType, NodeType};
pub use hypothesis::{Hypothesis, HypothesisSource, HypothesisStatus};
pub use incident::{Incident, IncidentSeverity, IncidentStatus, InvalidTransition};
pub use outbox::OutboxEvent;
pub use timeline::{IncidentEvent, IncidentEventType};
pub use tool_log::{ToolExecutionLog, ToolExecutionStatus};

/// Principal recorded on rows created without an explicit author.
pub const SYSTEM_PRINCIPAL: &str = "system";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("triaging".parse::<IncidentStatus>(), Ok(IncidentStatus::Triaging));
        assert_eq!(" Read ".parse::<RiskLevel>(), Ok(RiskLevel::Read));
        assert_eq!("SAFE_WRITE".parse::<RiskLevel>(), Ok(RiskLevel::SafeWrite));
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "SEV9".parse::<IncidentSeverity>().unwrap_err();
        assert_eq!(err.kind, "IncidentSeverity");
        assert_eq!(err.to_string(), "Unknown IncidentSeverity: SEV9");
    }

    #[test]
    fn serializes_as_upper_case_name() {
        let json = serde_json::to_string(&ActionStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(ActionStatus::ALL.len(), 9);
        assert_eq!(IncidentStatus::ALL.len(), 7);
    }
}
