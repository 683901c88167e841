//! Domain error types
//!
//! This module defines the error hierarchy for Wardflow. Routing conflicts and
//! storage failures each get their own enum; both fold into [`WardflowError`]
//! so callers only ever match on one type. Third-party error types never leak
//! through the public API.

use crate::domain::visit::{OverallStatus, Stage, StageStatus, VisitType};
use thiserror::Error;

/// Main Wardflow error type
///
/// This is the primary error type used throughout the crate.
#[derive(Debug, Error)]
pub enum WardflowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Routing and state-machine errors
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Storage backend errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A collaborating service (billing, inventory, lab, ...) failed
    #[error("Dependency unavailable: {service}: {message}")]
    DependencyUnavailable { service: String, message: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl WardflowError {
    /// Builds a [`WardflowError::DependencyUnavailable`]
    pub fn dependency(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the caller should re-fetch and retry the whole operation
    pub fn is_retryable(&self) -> bool {
        match self {
            WardflowError::Routing(err) => err.is_conflict(),
            WardflowError::Store(StoreError::ConnectionFailed(_))
            | WardflowError::Store(StoreError::TransactionFailed(_))
            | WardflowError::Store(StoreError::Conflict { .. }) => true,
            WardflowError::DependencyUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Whether this error is a stale-state conflict the acting department should see
    pub fn is_conflict(&self) -> bool {
        matches!(self, WardflowError::Routing(err) if err.is_conflict())
    }

    /// A write lost an optimistic check; re-reading and re-planning may succeed
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            WardflowError::Routing(RoutingError::ConcurrentModification { .. })
                | WardflowError::Store(StoreError::Conflict { .. })
        )
    }
}

/// Routing and stage-transition errors
///
/// These are raised by the transition engine and the coordinator when a
/// requested action does not fit the visit's recorded state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The caller completed a stage the visit is no longer (or not yet) at
    #[error("Stale transition on visit {visit_id}: expected stage {expected}, visit is at {actual}")]
    StaleTransition {
        visit_id: String,
        expected: Stage,
        actual: Stage,
    },

    /// The stage being completed is already finished
    #[error("Invalid stage state on visit {visit_id}: {stage} is {status}")]
    InvalidStageState {
        visit_id: String,
        stage: Stage,
        status: StageStatus,
    },

    /// The outcome does not apply to this stage and visit type
    #[error("Outcome '{outcome}' is not valid for {visit_type} visit at {stage}")]
    InvalidOutcome {
        stage: Stage,
        visit_type: VisitType,
        outcome: String,
    },

    /// The visit is completed or cancelled
    #[error("Visit {visit_id} is closed ({status})")]
    VisitClosed {
        visit_id: String,
        status: OverallStatus,
    },

    /// Another writer changed the visit between read and write
    #[error("Visit {visit_id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification {
        visit_id: String,
        expected_version: i64,
    },

    /// Lab stage cannot complete while tests are still running
    #[error("Visit {visit_id} has {pending} lab test(s) without results")]
    OutstandingLabTests { visit_id: String, pending: usize },

    /// A planned state would break a visit invariant
    #[error("Invariant violated on visit {visit_id}: {message}")]
    InvariantViolation { visit_id: String, message: String },
}

impl RoutingError {
    /// Conflicts are resolved by re-fetching the visit and retrying
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RoutingError::StaleTransition { .. }
                | RoutingError::InvalidStageState { .. }
                | RoutingError::ConcurrentModification { .. }
        )
    }
}

/// Storage backend errors
///
/// Errors raised by the visit store and the collaborator backends. They do not
/// expose driver types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An active visit already holds this admission key
    #[error("Duplicate admission for key {0}")]
    DuplicateAdmission(String),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stock adjustment would drive inventory negative
    #[error("Insufficient stock for medication {medication_id}: requested {requested}, available {available}")]
    InsufficientStock {
        medication_id: String,
        requested: i64,
        available: i64,
    },

    /// A record changed state between read and write
    #[error("{entity} {id} changed concurrently: {message}")]
    Conflict {
        entity: &'static str,
        id: String,
        message: String,
    },

    /// Failed to connect to the backend
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction could not be committed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Stored data could not be mapped to the domain model
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::Conflict`]
    pub fn conflict(
        entity: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StoreError::Conflict {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::NotFound`]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for WardflowError {
    fn from(err: std::io::Error) -> Self {
        WardflowError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for WardflowError {
    fn from(err: serde_json::Error) -> Self {
        WardflowError::Serialization(err.to_string())
    }
}

// Conversion from PostgreSQL driver errors; the driver type stays private
impl From<tokio_postgres::Error> for WardflowError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return StoreError::ConnectionFailed(err.to_string()).into();
        }
        let message = match err.as_db_error() {
            Some(db) => format!("{} ({})", db.message(), db.code().code()),
            None => err.to_string(),
        };
        StoreError::QueryFailed(message).into()
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for WardflowError {
    fn from(err: toml::de::Error) -> Self {
        WardflowError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wardflow_error_display() {
        let err = WardflowError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_routing_error_conversion() {
        let routing = RoutingError::StaleTransition {
            visit_id: "v-1".to_string(),
            expected: Stage::Nurse,
            actual: Stage::Doctor,
        };
        let err: WardflowError = routing.into();
        assert!(matches!(err, WardflowError::Routing(_)));
        assert!(err.is_retryable());
        assert!(err.is_conflict());
    }

    #[test]
    fn test_stale_transition_message() {
        let err = RoutingError::StaleTransition {
            visit_id: "v-1".to_string(),
            expected: Stage::Nurse,
            actual: Stage::Doctor,
        };
        assert_eq!(
            err.to_string(),
            "Stale transition on visit v-1: expected stage nurse, visit is at doctor"
        );
    }

    #[test]
    fn test_insufficient_stock_not_retryable() {
        let err: WardflowError = StoreError::InsufficientStock {
            medication_id: "med-1".to_string(),
            requested: 10,
            available: 5,
        }
        .into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("requested 10, available 5"));
    }

    #[test]
    fn test_dependency_unavailable_is_retryable() {
        let err = WardflowError::dependency("billing", "timeout");
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "Dependency unavailable: billing: timeout");
    }

    #[test]
    fn test_visit_closed_is_not_conflict() {
        let err = RoutingError::VisitClosed {
            visit_id: "v-1".to_string(),
            status: OverallStatus::Cancelled,
        };
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_write_conflicts() {
        let stale: WardflowError = RoutingError::ConcurrentModification {
            visit_id: "v-1".to_string(),
            expected_version: 3,
        }
        .into();
        assert!(stale.is_write_conflict());

        let dispensed: WardflowError =
            StoreError::conflict("prescription", "rx-1", "already dispensed").into();
        assert!(dispensed.is_write_conflict());
        assert!(dispensed.is_retryable());
        assert_eq!(
            dispensed.to_string(),
            "Store error: prescription rx-1 changed concurrently: already dispensed"
        );

        let duplicate: WardflowError = StoreError::DuplicateAdmission("k".to_string()).into();
        assert!(!duplicate.is_write_conflict());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: WardflowError = io_err.into();
        assert!(matches!(err, WardflowError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: WardflowError = toml_err.into();
        assert!(matches!(err, WardflowError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }
}
