//! The representation registry contract.
//!
//! An [`Interpreter`] turns schema nodes into one kind of representation
//! (an equality predicate, a renderer, a generator, a schema fragment).
//! It supplies one derivation per node kind; each derivation only sees the
//! already-derived representations of the node's direct children, never the
//! children's schemas.
//!
//! Every method has a default body that reports
//! [`SummonError::MissingDerivation`], so an interpreter that leaves a node
//! kind out fails when summoned on a schema that uses it, not silently.

use indexmap::IndexMap;

use crate::env::Environment;
use crate::error::{SummonError, SummonResult};
use crate::node::{Comparator, Discriminator, NodeId, ObjectMode, PrimitiveKind, Refinement, Schema};
use crate::recursive::Deferred;

/// Diagnostic metadata about the node being derived.
#[derive(Debug, Clone, Copy)]
pub struct NodeMeta<'a> {
    pub id: NodeId,
    /// Short kind label, e.g. `interface` or `tagged union`.
    pub kind: &'static str,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
}

impl<'a> NodeMeta<'a> {
    pub fn of(schema: &'a Schema) -> Self {
        Self {
            id: schema.id(),
            kind: schema.kind().label(),
            name: schema.config().name(),
            description: schema.config().description(),
        }
    }

    /// Human-readable description, e.g. `interface 'Foo'`.
    pub fn label(&self) -> String {
        match self.name {
            Some(name) => format!("{} '{}'", self.kind, name),
            None => self.kind.to_string(),
        }
    }
}

fn missing<R>(kind: &'static str, meta: &NodeMeta<'_>) -> SummonResult<R> {
    Err(SummonError::missing(kind, meta.label()))
}

/// One family of derivations, one method per node kind.
pub trait Interpreter: Send + Sync {
    /// The derived representation.
    type Repr: Clone + Send + Sync + 'static;

    /// Identifier used to key overrides in [`NodeConfig`](crate::NodeConfig).
    const KIND: &'static str;

    /// Display name for diagnostics.
    fn name(&self) -> &'static str {
        Self::KIND
    }

    fn primitive(
        &self,
        kind: PrimitiveKind,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (kind, env);
        missing(Self::KIND, meta)
    }

    fn string_literal(
        &self,
        value: &str,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (value, env);
        missing(Self::KIND, meta)
    }

    fn keys_of(
        &self,
        keys: &[String],
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (keys, env);
        missing(Self::KIND, meta)
    }

    fn nullable(
        &self,
        inner: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (inner, env);
        missing(Self::KIND, meta)
    }

    fn array(
        &self,
        element: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (element, env);
        missing(Self::KIND, meta)
    }

    fn set(
        &self,
        element: &Self::Repr,
        ordering: &Comparator,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (element, ordering, env);
        missing(Self::KIND, meta)
    }

    fn record(
        &self,
        key: &Self::Repr,
        value: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (key, value, env);
        missing(Self::KIND, meta)
    }

    fn newtype(
        &self,
        name: &str,
        underlying: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (name, underlying, env);
        missing(Self::KIND, meta)
    }

    /// Objects in all three modes. For `Interface` the optional map is
    /// empty, for `Partial` the required map is.
    fn object(
        &self,
        mode: ObjectMode,
        required: &IndexMap<String, Self::Repr>,
        optional: &IndexMap<String, Self::Repr>,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (mode, required, optional, env);
        missing(Self::KIND, meta)
    }

    /// Variants are keyed by their tag value. The summoner has already
    /// checked that each variant declares its own tag.
    fn tagged_union(
        &self,
        tag: &str,
        variants: &IndexMap<String, Self::Repr>,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (tag, variants, env);
        missing(Self::KIND, meta)
    }

    /// `members` and `discriminators` have the same length.
    fn union(
        &self,
        members: &[Self::Repr],
        discriminators: &[Discriminator],
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (members, discriminators, env);
        missing(Self::KIND, meta)
    }

    fn intersection(
        &self,
        members: &[Self::Repr],
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (members, env);
        missing(Self::KIND, meta)
    }

    fn refined(
        &self,
        base: &Self::Repr,
        refinement: &Refinement,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (base, refinement, env);
        missing(Self::KIND, meta)
    }

    /// Definition site of a recursive schema. `body` was derived with every
    /// self reference bound to the slot that will hold this node's final
    /// representation.
    fn recursive(
        &self,
        name: &str,
        body: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (name, meta, env);
        Ok(body.clone())
    }

    /// A self reference inside a recursive body. `deferred` is still empty
    /// while summoning and is filled before the summoner returns.
    fn self_reference(
        &self,
        name: &str,
        deferred: Deferred<Self::Repr>,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (name, deferred, env);
        missing(Self::KIND, meta)
    }

    fn either(
        &self,
        left: &Self::Repr,
        right: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (left, right, env);
        missing(Self::KIND, meta)
    }

    fn option(
        &self,
        inner: &Self::Repr,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Self::Repr> {
        let _ = (inner, env);
        missing(Self::KIND, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl Interpreter for Nothing {
        type Repr = ();
        const KIND: &'static str = "Nothing";
    }

    #[test]
    fn test_defaults_report_missing_derivation() {
        let schema = Schema::string().named("Name");
        let meta = NodeMeta::of(&schema);
        let err = Nothing
            .primitive(PrimitiveKind::String, &meta, &Environment::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "interpreter 'Nothing' has no derivation for string 'Name'"
        );
    }

    #[test]
    fn test_recursive_defaults_to_body() {
        let schema = Schema::string();
        let meta = NodeMeta::of(&schema);
        assert!(Nothing
            .recursive("R", &(), &meta, &Environment::new())
            .is_ok());
        assert_eq!(Nothing.name(), "Nothing");
    }
}
