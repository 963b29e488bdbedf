//! Error types for representation derivation.
//!
//! Every failure here is a composition error: it is reported synchronously by
//! the summoner and no partial representation is ever returned. Runtime
//! outcomes of a representation (an `Eq` answering `false`, a refinement
//! rejecting a value) are ordinary results, not errors.

use thiserror::Error;

/// Result type alias for summoning operations.
pub type SummonResult<T> = Result<T, SummonError>;

/// Main error type for summoning operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummonError {
    /// The interpreter does not register a derivation for this node kind.
    #[error("interpreter '{kind}' has no derivation for {node}")]
    MissingDerivation { kind: &'static str, node: String },

    /// A tagged union variant does not declare its own tag as a literal.
    #[error("tagged union on '{tag}': variant '{variant}' {reason}")]
    MalformedTaggedUnion {
        tag: String,
        variant: String,
        reason: String,
    },

    /// An untagged union whose discriminators do not line up with its members.
    #[error("union has {members} members but {discriminators} discriminators")]
    MalformedUnion {
        members: usize,
        discriminators: usize,
    },

    /// A node override registered under `kind` has the wrong representation type.
    #[error("override for '{kind}' on {node} does not produce a '{kind}' representation")]
    ConfigMismatch { kind: &'static str, node: String },

    /// A recursive body reaches its own placeholder without passing through
    /// any structure that could end the recursion.
    #[error("recursive schema '{name}' refers to itself without an enclosing structure")]
    UnguardedRecursion { name: String },

    /// A self reference whose recursive definition no longer exists.
    #[error("self reference to '{name}' outlived its recursive definition")]
    DanglingSelfReference { name: String },

    /// The fold went deeper than the configured limit.
    #[error("derivation exceeded the depth limit of {limit} at {path}")]
    DepthExceeded { limit: usize, path: String },

    /// An interpreter rejected a node while deriving it.
    #[error("interpreter '{kind}' failed on {node}: {message}")]
    Derivation {
        kind: &'static str,
        node: String,
        message: String,
    },
}

impl SummonError {
    /// Create a missing derivation error.
    pub fn missing(kind: &'static str, node: impl Into<String>) -> Self {
        Self::MissingDerivation {
            kind,
            node: node.into(),
        }
    }

    /// Create a malformed tagged union error.
    pub fn malformed_tagged_union(
        tag: impl Into<String>,
        variant: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedTaggedUnion {
            tag: tag.into(),
            variant: variant.into(),
            reason: reason.into(),
        }
    }

    /// Create an interpreter-specific derivation error.
    pub fn derivation(
        kind: &'static str,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Derivation {
            kind,
            node: node.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error comes from the shape of the schema itself
    /// rather than from the interpreter or its configuration.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedTaggedUnion { .. }
                | Self::MalformedUnion { .. }
                | Self::UnguardedRecursion { .. }
                | Self::DanglingSelfReference { .. }
                | Self::DepthExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_derivation_message() {
        let err = SummonError::missing("Eq", "interface 'Foo'");
        assert_eq!(
            err.to_string(),
            "interpreter 'Eq' has no derivation for interface 'Foo'"
        );
        assert!(!err.is_schema_error());
    }

    #[test]
    fn test_tagged_union_message() {
        let err = SummonError::malformed_tagged_union("type", "foo", "declares 'bar' instead");
        assert_eq!(
            err.to_string(),
            "tagged union on 'type': variant 'foo' declares 'bar' instead"
        );
        assert!(err.is_schema_error());
    }
}
