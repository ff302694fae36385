//! Error types for the key tree
//!
//! Tree-shape errors are returned as typed results. `NotFound` is the only
//! kind a caller is expected to recover from; the others indicate a corrupted
//! tree or a broken DH primitive.

use thiserror::Error;

use crate::node::{MemberId, NodeRef};

/// Main error type for key tree operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// No live leaf carries this member id
    #[error("member {0} not found")]
    NotFound(MemberId),

    /// The node is not (or no longer) part of the tree
    #[error("unknown node {0}")]
    UnknownNode(NodeRef),

    /// Internal consistency check failed
    #[error("structural invariant violated: {0}")]
    StructuralInvariantViolation(String),

    /// The Diffie-Hellman primitive failed
    #[error("key primitive failure: {0}")]
    PrimitiveFailure(String),

    /// Invalid tree configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TreeError {
    /// Shorthand for building a `StructuralInvariantViolation`
    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        TreeError::StructuralInvariantViolation(msg.into())
    }

    /// Whether the error means the tree can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TreeError::StructuralInvariantViolation(_) | TreeError::PrimitiveFailure(_)
        )
    }
}

/// Result type for key tree operations
pub type TreeResult<T> = Result<T, TreeError>;
