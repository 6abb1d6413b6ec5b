//! Error types for the document transaction engine
//!
//! This module defines the single error enum used throughout the workspace.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into three groups:
//! - Schema errors (unknown class, attribute, predicate, tx kind): fatal, they
//!   indicate a model bug and must never be turned into an empty result.
//! - Document errors (exists, not found, invalid attachment or update).
//! - Infrastructure errors (I/O, serialization, storage adapters).

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DocError>;

/// Error types for the document transaction engine
#[derive(Debug, Error)]
pub enum DocError {
    /// Class, mixin or interface id is not registered in the hierarchy
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Attribute is not declared on the class or any of its ancestors
    #[error("attribute '{attribute}' not found on class {class}")]
    AttributeNotFound {
        /// Class the lookup started from
        class: String,
        /// Attribute name
        attribute: String,
    },

    /// No class in the ancestor chain declares a storage domain
    #[error("domain not found for class {0}")]
    DomainNotFound(String),

    /// Transaction `_class` is not one of the known kinds
    #[error("unknown transaction kind: {0}")]
    UnknownTxKind(String),

    /// `$`-prefixed query key that the evaluator does not implement
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),

    /// Known predicate with an operand of the wrong shape
    #[error("invalid predicate {predicate}: {reason}")]
    InvalidPredicate {
        /// Predicate key, e.g. `$in`
        predicate: String,
        /// What was wrong with the operand
        reason: String,
    },

    /// Creation targeted an `_id` that already exists
    #[error("document already exists: {0}")]
    DocumentExists(String),

    /// Mutation targeted an `_id` that does not exist
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Attached document does not fit its parent
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Update operations could not be applied
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Session is not allowed to read or write the target space
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed caller input (configuration, options)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (transaction log files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage adapter failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl DocError {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        DocError::InvalidInput(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        DocError::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        DocError::Internal(msg.into())
    }

    /// Create an invalid update error
    pub fn invalid_update(msg: impl Into<String>) -> Self {
        DocError::InvalidUpdate(msg.into())
    }

    /// Create an invalid predicate error
    pub fn invalid_predicate(predicate: impl Into<String>, reason: impl Into<String>) -> Self {
        DocError::InvalidPredicate {
            predicate: predicate.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by a broken model or query schema.
    ///
    /// These are surfaced to the operator and never swallowed.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            DocError::ClassNotFound(_)
                | DocError::AttributeNotFound { .. }
                | DocError::DomainNotFound(_)
                | DocError::UnknownTxKind(_)
                | DocError::UnknownPredicate(_)
                | DocError::InvalidPredicate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_class_not_found() {
        let err = DocError::ClassNotFound("tracker:class:Issue".to_string());
        let msg = err.to_string();
        assert!(msg.contains("class not found"));
        assert!(msg.contains("tracker:class:Issue"));
    }

    #[test]
    fn test_error_display_attribute_not_found() {
        let err = DocError::AttributeNotFound {
            class: "core:class:Doc".to_string(),
            attribute: "title".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'title'"));
        assert!(msg.contains("core:class:Doc"));
    }

    #[test]
    fn test_error_display_invalid_predicate() {
        let err = DocError::invalid_predicate("$in", "operand must be an array");
        assert_eq!(
            err.to_string(),
            "invalid predicate $in: operand must be an array"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: DocError = io_err.into();
        assert!(matches!(err, DocError::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let result: Result<serde_json::Value> =
            serde_json::from_str("{not json").map_err(DocError::from);
        assert!(matches!(result, Err(DocError::Serialization(_))));
    }

    #[test]
    fn test_schema_error_classification() {
        assert!(DocError::UnknownPredicate("$foo".into()).is_schema_error());
        assert!(DocError::UnknownTxKind("x".into()).is_schema_error());
        assert!(DocError::DomainNotFound("x".into()).is_schema_error());
        assert!(!DocError::DocumentExists("x".into()).is_schema_error());
        assert!(!DocError::storage("down").is_schema_error());
    }
}
