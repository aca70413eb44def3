use thiserror::Error;

/// Errors raised when a job, plan, or configuration value is rejected at
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("duplicate workload name '{0}'")]
    DuplicateWorkload(String),

    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("plan has no domain plans")]
    EmptyPlan,
}

impl ConfigurationError {
    /// Shorthand for [`ConfigurationError::InvalidField`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors from repository operations (used by trait definitions in assayer-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    /// A persisted record could not be decoded. Fatal when loading state.
    #[error("corrupted record '{id}': {reason}")]
    Corrupted { id: String, reason: String },

    #[error("entity not found")]
    NotFound,
}
