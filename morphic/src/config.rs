//! Per-node configuration and the override protocol.
//!
//! Every schema node carries a [`NodeConfig`]: an optional name and
//! description, plus a map from interpreter kind to an [`Override`] of that
//! interpreter's representation. The summoner applies a node's override
//! after deriving the node's default representation:
//!
//! ```text
//! children (with their own overrides) -> default derivation -> node override
//! ```
//!
//! Because children are already overridden when the parent derives, an
//! override placed on a field is seen by every parent derivation built on it.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = NodeConfig::named("Foo")
//!     .with_override::<EqInterpreter>(Override::constant(Eq::always()))
//!     .with_override::<ShowInterpreter>(Override::transform(|show, _env| show.labeled("Foo")));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::env::Environment;
use crate::error::{SummonError, SummonResult};
use crate::interpreter::{Interpreter, NodeMeta};

/// Already-derived child representations of a node (the "defaults by
/// field" view an override composes with).
#[derive(Clone)]
pub enum Children<R> {
    /// Node without child schemas.
    Leaf,
    /// Wrappers: nullable, array, set, newtype, refined, option, recursive.
    Single(R),
    /// Record (key, value) and either (left, right).
    Pair(R, R),
    /// Objects.
    Fields {
        required: IndexMap<String, R>,
        optional: IndexMap<String, R>,
    },
    /// Union and intersection members, in declaration order.
    Members(Vec<R>),
    /// Tagged union variants by tag value.
    Variants(IndexMap<String, R>),
}

impl<R> Children<R> {
    /// A field representation, required first then optional.
    pub fn field(&self, name: &str) -> Option<&R> {
        match self {
            Self::Fields { required, optional } => {
                required.get(name).or_else(|| optional.get(name))
            }
            _ => None,
        }
    }

    pub fn required(&self) -> Option<&IndexMap<String, R>> {
        match self {
            Self::Fields { required, .. } => Some(required),
            _ => None,
        }
    }

    pub fn optional(&self) -> Option<&IndexMap<String, R>> {
        match self {
            Self::Fields { optional, .. } => Some(optional),
            _ => None,
        }
    }

    pub fn member(&self, index: usize) -> Option<&R> {
        self.members().and_then(|members| members.get(index))
    }

    pub fn members(&self) -> Option<&[R]> {
        match self {
            Self::Members(members) => Some(members),
            _ => None,
        }
    }

    pub fn variant(&self, tag: &str) -> Option<&R> {
        match self {
            Self::Variants(variants) => variants.get(tag),
            _ => None,
        }
    }

    pub fn single(&self) -> Option<&R> {
        match self {
            Self::Single(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf)
    }
}

type OverrideFn<R> = dyn Fn(R, &Environment, &Children<R>) -> R + Send + Sync;

/// A user-supplied replacement or transform of one interpreter's
/// representation at one node.
pub struct Override<R>(Arc<OverrideFn<R>>);

impl<R: 'static> Override<R> {
    /// Full form: receives the default, the environment and the children.
    pub fn compose(
        f: impl Fn(R, &Environment, &Children<R>) -> R + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Transform the default representation.
    pub fn transform(f: impl Fn(R, &Environment) -> R + Send + Sync + 'static) -> Self {
        Self::compose(move |default, env, _| f(default, env))
    }

    /// Discard the default and build a new representation from the
    /// environment.
    pub fn replace(f: impl Fn(&Environment) -> R + Send + Sync + 'static) -> Self {
        Self::compose(move |_, env, _| f(env))
    }

    /// Always use `repr`.
    pub fn constant(repr: R) -> Self
    where
        R: Clone + Send + Sync,
    {
        Self::compose(move |_, _, _| repr.clone())
    }

    pub fn apply(&self, default: R, env: &Environment, children: &Children<R>) -> R {
        (self.0)(default, env, children)
    }
}

impl<R> Clone for Override<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<R> fmt::Debug for Override<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Override")
    }
}

/// Configuration attached to a schema node.
#[derive(Clone, Default)]
pub struct NodeConfig {
    name: Option<String>,
    description: Option<String>,
    conf: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that only names the node.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Register an override for interpreter `I`, replacing any previous one.
    pub fn with_override<I: Interpreter>(self, over: Override<I::Repr>) -> Self {
        self.with_erased(I::KIND, Arc::new(over))
    }

    /// Register a type-erased override under an interpreter kind.
    ///
    /// The value must be an `Override<R>` for that interpreter's
    /// representation `R`, otherwise summoning fails with
    /// [`SummonError::ConfigMismatch`].
    pub fn with_erased(mut self, kind: &'static str, value: Arc<dyn Any + Send + Sync>) -> Self {
        self.conf.insert(kind, value);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn has_override(&self, kind: &str) -> bool {
        self.conf.contains_key(kind)
    }

    /// Kinds with a registered override, sorted.
    pub fn override_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.conf.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Resolve the effective representation for `kind` at this node.
    ///
    /// `children` is only evaluated when an override is present.
    pub fn apply<R: 'static>(
        &self,
        kind: &'static str,
        meta: &NodeMeta<'_>,
        default: R,
        env: &Environment,
        children: impl FnOnce() -> Children<R>,
    ) -> SummonResult<R> {
        let Some(erased) = self.conf.get(kind) else {
            return Ok(default);
        };
        let over = erased
            .downcast_ref::<Override<R>>()
            .ok_or_else(|| SummonError::ConfigMismatch {
                kind,
                node: meta.label(),
            })?;
        debug!(kind, node = %meta.label(), "applying node override");
        Ok(over.apply(default, env, &children()))
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("overrides", &self.override_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Schema;

    fn meta(schema: &Schema) -> NodeMeta<'_> {
        NodeMeta::of(schema)
    }

    #[test]
    fn test_absent_override_returns_default() {
        let schema = Schema::string();
        let out = NodeConfig::new()
            .apply("Count", &meta(&schema), 3usize, &Environment::new(), || {
                panic!("children must not be built without an override")
            })
            .unwrap();
        assert_eq!(out, 3);
    }

    #[test]
    fn test_override_composes_with_children() {
        let schema = Schema::string();
        let config = NodeConfig::new().with_erased(
            "Count",
            Arc::new(Override::<usize>::compose(|default, _, children| {
                default + children.members().map_or(0, |m| m.iter().sum())
            })),
        );
        let out = config
            .apply("Count", &meta(&schema), 1usize, &Environment::new(), || {
                Children::Members(vec![2, 3])
            })
            .unwrap();
        assert_eq!(out, 6);
    }

    #[test]
    fn test_wrong_override_type_is_mismatch() {
        let schema = Schema::string().named("Foo");
        let config = NodeConfig::new().with_erased("Count", Arc::new("not an override"));
        let err = config
            .apply("Count", &meta(&schema), 1usize, &Environment::new(), || {
                Children::Leaf
            })
            .unwrap_err();
        assert_eq!(
            err,
            SummonError::ConfigMismatch {
                kind: "Count",
                node: "string 'Foo'".to_string()
            }
        );
    }

    #[test]
    fn test_transform_and_replace_read_env() {
        #[derive(Clone, Default)]
        struct Bonus(usize);
        let env = Environment::new().with(Bonus(10));
        let transform = Override::<usize>::transform(|d, env| d + env.get_or_default::<Bonus>().0);
        let replace = Override::<usize>::replace(|env| env.get_or_default::<Bonus>().0);
        assert_eq!(transform.apply(1, &env, &Children::Leaf), 11);
        assert_eq!(replace.apply(1, &env, &Children::Leaf), 10);
        assert_eq!(Override::constant(4usize).apply(1, &env, &Children::Leaf), 4);
    }

    #[test]
    fn test_children_field_lookup() {
        let mut required = IndexMap::new();
        required.insert("type".to_string(), 1);
        let mut optional = IndexMap::new();
        optional.insert("a".to_string(), 2);
        let children = Children::Fields { required, optional };
        assert_eq!(children.field("type"), Some(&1));
        assert_eq!(children.field("a"), Some(&2));
        assert_eq!(children.field("b"), None);
        assert!(children.members().is_none());
    }
}
