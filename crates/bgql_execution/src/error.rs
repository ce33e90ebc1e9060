//! Error types for execution.
//!
//! Node-level faults are [`ResolverError`]s and stay attached to the node
//! that produced them. Run-level failures are [`ExecutionError`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Error produced while resolving a single node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    /// Field not defined on the parent type.
    #[error("Cannot query field \"{field}\" on type \"{type_name}\"")]
    FieldNotFound { type_name: String, field: String },

    /// Missing required argument.
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    /// Argument parse error.
    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    /// The requested entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An abstract type could not be resolved to an object type.
    #[error("Abstract type \"{0}\" must resolve to an object type at runtime")]
    AbstractType(String),

    /// The resolved value does not fit the declared type.
    #[error("Expected {expected} for field \"{field}\", got {found}")]
    UnexpectedValue {
        field: String,
        expected: &'static str,
        found: String,
    },

    /// The batch fetch behind a deferred value failed.
    #[error("Batch fetch '{loader}' failed: {message}")]
    BatchFetch { loader: String, message: String },

    /// Asynchronous work did not finish in time.
    #[error("Resolver timed out after {0:?}")]
    Timeout(Duration),

    /// The resolver task panicked or was aborted.
    #[error("Resolver task failed: {0}")]
    Panicked(String),

    /// Custom error.
    #[error("{0}")]
    Custom(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    /// Creates a custom error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Error that ends a run without a usable result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The cancellation signal fired before the tree was complete.
    #[error("Execution was cancelled")]
    Cancelled,

    /// The root node faulted, so no data can be produced.
    #[error("No data: {0}")]
    NoData(ResolverError),

    /// The schema has no root type for the requested operation.
    #[error("Schema does not define a {0} root type")]
    MissingRootType(&'static str),

    /// The operation kind cannot be executed by this executor.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The scheduler reached a state that should be impossible.
    #[error("Scheduler invariant violated: {0}")]
    Invariant(String),
}

impl ExecutionError {
    /// Returns true if the run was aborted by cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A field error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", serde_json::Value::String(code.into()))
    }
}

impl From<ResolverError> for FieldError {
    fn from(error: ResolverError) -> Self {
        FieldError::new(error.to_string())
    }
}

impl From<ExecutionError> for FieldError {
    fn from(error: ExecutionError) -> Self {
        let code = match &error {
            ExecutionError::Cancelled => "CANCELLED",
            ExecutionError::NoData(_) => "NO_DATA",
            ExecutionError::MissingRootType(_) | ExecutionError::UnsupportedOperation(_) => {
                "EXECUTION_ERROR"
            }
            ExecutionError::Invariant(_) => "INTERNAL_ERROR",
        };
        FieldError::new(error.to_string()).with_code(code)
    }
}
