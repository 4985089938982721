//! Error types for cairn operations.
//!
//! This module provides the error hierarchy shared by the model and the
//! relational store, with structured error codes for programmatic handling.

use thiserror::Error;

/// Result type alias for cairn operations.
pub type CairnResult<T> = Result<T, CairnError>;

/// Main error type for all cairn operations.
#[derive(Error, Debug)]
pub enum CairnError {
    /// A schema, schema version or data version does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String, code: ErrorCode },

    /// A tag string is not bound in the given schema.
    #[error("Unknown tag '{tag}' in schema '{schema}'")]
    UnknownTag { schema: String, tag: String },

    /// A version number is already taken, or a concurrent writer won the
    /// allocation race and the bounded retry budget is exhausted.
    #[error("Version conflict: {message}")]
    VersionConflict { message: String },

    /// A tag string is already bound to a version pair; tags never move.
    #[error("Tag '{tag}' is already bound in schema '{schema}'")]
    TagConflict { schema: String, tag: String },

    /// A stored row references a class or object that is not resolvable
    /// within its own version.
    #[error("Corrupt store: {message}")]
    Corrupt { message: String },

    /// An incremental version references a base that is missing from the
    /// directory. Indicates out-of-band tampering; never retried.
    #[error("Broken base chain in schema '{schema}': version {version} references missing base {base}")]
    ChainBroken {
        schema: String,
        version: i64,
        base: i64,
    },

    /// A base chain revisits a version number. Must never occur for a
    /// correctly written store; never retried.
    #[error("Cyclic base chain in schema '{schema}' at version {version}")]
    CyclicChain { schema: String, version: i64 },

    /// A mutating operation was attempted on a read-only session.
    #[error("Session is read-only: {operation}")]
    ReadOnly { operation: String },

    /// Propagated failure from the relational backend.
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid argument or model misuse.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Versions (VER_xxx)
    VerNotFound,
    VerConflict,

    // Schema (SCH_xxx)
    SchemaNotFound,
    SchemaCorrupt,

    // Tags (TAG_xxx)
    TagUnknown,
    TagConflict,

    // Base chains (CHN_xxx)
    ChainBroken,
    ChainCyclic,

    // Database (DB_xxx)
    DbOperationFailed,
    DbReadOnly,

    // Validation (VAL_xxx)
    ValInvalidInput,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::VerNotFound => "VER_001",
            ErrorCode::VerConflict => "VER_002",
            ErrorCode::SchemaNotFound => "SCH_001",
            ErrorCode::SchemaCorrupt => "SCH_002",
            ErrorCode::TagUnknown => "TAG_001",
            ErrorCode::TagConflict => "TAG_002",
            ErrorCode::ChainBroken => "CHN_001",
            ErrorCode::ChainCyclic => "CHN_002",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::DbReadOnly => "DB_002",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl CairnError {
    /// Create a not-found error for a schema version.
    pub fn schema_not_found(schema: impl Into<String>, version: i64) -> Self {
        Self::NotFound {
            message: format!(
                "schema '{}' has no version {}",
                schema.into(),
                version
            ),
            code: ErrorCode::SchemaNotFound,
        }
    }

    /// Create a not-found error for a schema with no versions at all.
    pub fn no_versions(schema: impl Into<String>) -> Self {
        Self::NotFound {
            message: format!("schema '{}' has no versions", schema.into()),
            code: ErrorCode::VerNotFound,
        }
    }

    /// Create a not-found error for a data version.
    pub fn data_version_not_found(schema: impl Into<String>, version: i64) -> Self {
        Self::NotFound {
            message: format!(
                "schema '{}' has no data version {}",
                schema.into(),
                version
            ),
            code: ErrorCode::VerNotFound,
        }
    }

    /// Create an unknown-tag error.
    pub fn unknown_tag(schema: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::UnknownTag {
            schema: schema.into(),
            tag: tag.into(),
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(message: impl Into<String>) -> Self {
        Self::VersionConflict {
            message: message.into(),
        }
    }

    /// Create a tag conflict error.
    pub fn tag_conflict(schema: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::TagConflict {
            schema: schema.into(),
            tag: tag.into(),
        }
    }

    /// Create a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Create a broken-chain error.
    pub fn chain_broken(schema: impl Into<String>, version: i64, base: i64) -> Self {
        Self::ChainBroken {
            schema: schema.into(),
            version,
            base,
        }
    }

    /// Create a cyclic-chain error.
    pub fn cyclic_chain(schema: impl Into<String>, version: i64) -> Self {
        Self::CyclicChain {
            schema: schema.into(),
            version,
        }
    }

    /// Create a read-only session error.
    pub fn read_only(operation: impl Into<String>) -> Self {
        Self::ReadOnly {
            operation: operation.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { code, .. } => *code,
            Self::UnknownTag { .. } => ErrorCode::TagUnknown,
            Self::VersionConflict { .. } => ErrorCode::VerConflict,
            Self::TagConflict { .. } => ErrorCode::TagConflict,
            Self::Corrupt { .. } => ErrorCode::SchemaCorrupt,
            Self::ChainBroken { .. } => ErrorCode::ChainBroken,
            Self::CyclicChain { .. } => ErrorCode::ChainCyclic,
            Self::ReadOnly { .. } => ErrorCode::DbReadOnly,
            Self::Backend { .. } => ErrorCode::DbOperationFailed,
            Self::Validation { .. } => ErrorCode::ValInvalidInput,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether a failed operation may be retried by re-resolving the max
    /// version. Chain and backend errors must never be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<rusqlite::Error> for CairnError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_not_found() {
        let err = CairnError::schema_not_found("HW", 3);
        assert_eq!(err.code(), ErrorCode::SchemaNotFound);
        assert!(err.to_string().contains("HW"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_version_conflict_is_retryable() {
        let err = CairnError::version_conflict("version 5 already exists");
        assert_eq!(err.code(), ErrorCode::VerConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_chain_errors_are_not_retryable() {
        let broken = CairnError::chain_broken("HW", 7, 3);
        let cyclic = CairnError::cyclic_chain("HW", 7);
        assert_eq!(broken.code(), ErrorCode::ChainBroken);
        assert_eq!(cyclic.code(), ErrorCode::ChainCyclic);
        assert!(!broken.is_retryable());
        assert!(!cyclic.is_retryable());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::VerConflict.as_str(), "VER_002");
        assert_eq!(ErrorCode::TagConflict.as_str(), "TAG_002");
        assert_eq!(ErrorCode::DbReadOnly.as_str(), "DB_002");
    }
}
