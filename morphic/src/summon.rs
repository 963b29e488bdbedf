//! The summoning engine: one bottom-up fold of a schema per interpreter.
//!
//! For every node the fold derives the children first (each with its own
//! override applied), then calls the interpreter's derivation for the node,
//! then applies the node's override. Shared subtrees are derived once per
//! call. Nothing is cached across calls, so concurrent summons over the same
//! schema never share state.
//!
//! Recursive definitions are bound to a [`Deferred`] slot while their body is
//! derived; a memoized representation remembers which slots it read, and is
//! only reused while those same slots are bound.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::Children;
use crate::env::Environment;
use crate::error::{SummonError, SummonResult};
use crate::interpreter::{Interpreter, NodeMeta};
use crate::node::{Discriminator, NodeId, NodeKind, ObjectMode, Schema};
use crate::recursive::{self, Deferred, RecursiveAnchor, SelfRef};

/// Default limit on the nesting depth of a single derivation.
///
/// Each nested level costs a few stack frames, so the limit is set to stay
/// well inside the 2 MiB stack of a spawned thread in debug builds.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Configuration for [`Summoner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummonConfig {
    /// Deepest chain of nested nodes the fold will enter before failing with
    /// [`SummonError::DepthExceeded`].
    pub max_depth: usize,
}

impl Default for SummonConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SummonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Derives representations of schemas in a fixed environment.
///
/// # Example
///
/// ```rust,ignore
/// let env = Environment::new();
/// let eq = Summoner::new(&env).summon(&EqInterpreter, &schema)?;
/// ```
#[derive(Debug, Clone)]
pub struct Summoner<'e> {
    env: &'e Environment,
    config: SummonConfig,
}

impl<'e> Summoner<'e> {
    pub fn new(env: &'e Environment) -> Self {
        Self {
            env,
            config: SummonConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SummonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SummonConfig {
        &self.config
    }

    pub fn env(&self) -> &'e Environment {
        self.env
    }

    /// Fold `schema` with `interpreter`.
    ///
    /// Fails without returning any partial representation when a node kind
    /// has no derivation, a tagged union variant does not declare its tag, a
    /// union's discriminators do not match its members, an override has the
    /// wrong type, or a recursive definition cannot terminate.
    #[tracing::instrument(skip_all, fields(kind = I::KIND, root = %schema.label()))]
    pub fn summon<I: Interpreter>(
        &self,
        interpreter: &I,
        schema: &Schema,
    ) -> SummonResult<I::Repr> {
        let mut pass = Pass {
            interpreter,
            env: self.env,
            max_depth: self.config.max_depth,
            memo: HashMap::new(),
            pending: HashMap::new(),
            frames: Vec::new(),
            retained: Vec::new(),
        };
        let repr = pass.derive(schema)?;
        debug!(nodes = pass.memo.len(), "summoned representation");
        Ok(repr)
    }
}

/// Summon with the default configuration.
pub fn summon<I: Interpreter>(
    interpreter: &I,
    schema: &Schema,
    env: &Environment,
) -> SummonResult<I::Repr> {
    Summoner::new(env).summon(interpreter, schema)
}

/// A recursive slot read by a derivation: (anchor id, slot id).
type Binding = (usize, usize);

struct Memo<R> {
    repr: R,
    reads: Vec<Binding>,
}

struct Frame {
    schema: Schema,
    reads: Vec<Binding>,
}

struct Pass<'a, I: Interpreter> {
    interpreter: &'a I,
    env: &'a Environment,
    max_depth: usize,
    memo: HashMap<NodeId, Memo<I::Repr>>,
    pending: HashMap<usize, Deferred<I::Repr>>,
    frames: Vec<Frame>,
    /// Definitions re-entered through escaped self references, kept alive so
    /// memoized node ids stay valid for the whole pass.
    retained: Vec<Arc<RecursiveAnchor>>,
}

impl<'a, I: Interpreter> Pass<'a, I> {
    fn derive(&mut self, schema: &Schema) -> SummonResult<I::Repr> {
        if let Some(repr) = self.recall(schema.id()) {
            trace!(node = %schema.label(), "memo hit");
            return Ok(repr);
        }
        if self.frames.len() >= self.max_depth {
            return Err(SummonError::DepthExceeded {
                limit: self.max_depth,
                path: self.path(schema),
            });
        }

        trace!(node = %schema.label(), depth = self.frames.len(), "deriving");
        self.frames.push(Frame {
            schema: schema.clone(),
            reads: Vec::new(),
        });
        let result = self.derive_node(schema);
        let reads = self.frames.pop().map(|frame| frame.reads).unwrap_or_default();
        let repr = result?;

        self.record(&reads);
        // A self reference depends on which definition is bound, not on the
        // node itself.
        if !matches!(schema.kind(), NodeKind::SelfRef(_)) {
            self.memo.insert(
                schema.id(),
                Memo {
                    repr: repr.clone(),
                    reads,
                },
            );
        }
        Ok(repr)
    }

    fn recall(&mut self, id: NodeId) -> Option<I::Repr> {
        let memo = self.memo.get(&id)?;
        let valid = memo.reads.iter().all(|(anchor, slot)| {
            self.pending.get(anchor).map(Deferred::id) == Some(*slot)
        });
        if !valid {
            return None;
        }
        let (repr, reads) = (memo.repr.clone(), memo.reads.clone());
        self.record(&reads);
        Some(repr)
    }

    /// Adds slot reads to the innermost frame.
    fn record(&mut self, reads: &[Binding]) {
        if let Some(frame) = self.frames.last_mut() {
            for binding in reads {
                if !frame.reads.contains(binding) {
                    frame.reads.push(*binding);
                }
            }
        }
    }

    fn path(&self, next: &Schema) -> String {
        self.frames
            .iter()
            .map(|frame| frame.schema.label())
            .chain(std::iter::once(next.label()))
            .collect::<Vec<_>>()
            .join(" > ")
    }

    fn derive_node(&mut self, schema: &Schema) -> SummonResult<I::Repr> {
        let meta = NodeMeta::of(schema);
        let (default, children) = match schema.kind() {
            NodeKind::Recursive(anchor) => return self.derive_recursive(anchor, schema, &meta),
            NodeKind::SelfRef(self_ref) => {
                (self.derive_self_reference(self_ref, &meta)?, Children::Leaf)
            }
            NodeKind::Object {
                mode,
                required,
                optional,
            } => self.derive_object(*mode, required, optional, &meta)?,
            NodeKind::TaggedUnion { tag, variants } => {
                self.derive_tagged_union(tag, variants, &meta)?
            }
            NodeKind::Union {
                members,
                discriminators,
            } => self.derive_union(members, discriminators, &meta)?,
            NodeKind::Intersection(members) => {
                let members = self.derive_all(members)?;
                let default = self.interpreter.intersection(&members, &meta, self.env)?;
                (default, Children::Members(members))
            }
            kind => self.derive_wrapper(kind, &meta)?,
        };

        schema
            .config()
            .apply(I::KIND, &meta, default, self.env, move || children)
    }

    /// Leaves and nodes with one or two children.
    ///
    /// Kept out of `derive_node` so the frame that stays live across each
    /// nested `derive` call is small.
    fn derive_wrapper(
        &mut self,
        kind: &NodeKind,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<(I::Repr, Children<I::Repr>)> {
        let interp = self.interpreter;
        let env = self.env;
        Ok(match kind {
            NodeKind::Primitive(kind) => (interp.primitive(*kind, meta, env)?, Children::Leaf),
            NodeKind::StringLiteral(value) => {
                (interp.string_literal(value, meta, env)?, Children::Leaf)
            }
            NodeKind::KeysOf(keys) => (interp.keys_of(keys, meta, env)?, Children::Leaf),
            NodeKind::Nullable(inner) => {
                let inner = self.derive(inner)?;
                (interp.nullable(&inner, meta, env)?, Children::Single(inner))
            }
            NodeKind::Option(inner) => {
                let inner = self.derive(inner)?;
                (interp.option(&inner, meta, env)?, Children::Single(inner))
            }
            NodeKind::Array(element) => {
                let element = self.derive(element)?;
                (interp.array(&element, meta, env)?, Children::Single(element))
            }
            NodeKind::Set { element, ordering } => {
                let element = self.derive(element)?;
                let default = interp.set(&element, ordering, meta, env)?;
                (default, Children::Single(element))
            }
            NodeKind::Newtype { name, underlying } => {
                let underlying = self.derive(underlying)?;
                let default = interp.newtype(name, &underlying, meta, env)?;
                (default, Children::Single(underlying))
            }
            NodeKind::Refined { base, refinement } => {
                let base = self.derive(base)?;
                let default = interp.refined(&base, refinement, meta, env)?;
                (default, Children::Single(base))
            }
            NodeKind::Record { key, value } => {
                let key = self.derive(key)?;
                let value = self.derive(value)?;
                let default = interp.record(&key, &value, meta, env)?;
                (default, Children::Pair(key, value))
            }
            NodeKind::Either { left, right } => {
                let left = self.derive(left)?;
                let right = self.derive(right)?;
                let default = interp.either(&left, &right, meta, env)?;
                (default, Children::Pair(left, right))
            }
            // Composite kinds are matched in `derive_node` first.
            other => return Err(SummonError::missing(I::KIND, other.label())),
        })
    }

    fn derive_object(
        &mut self,
        mode: ObjectMode,
        required: &IndexMap<String, Schema>,
        optional: &IndexMap<String, Schema>,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<(I::Repr, Children<I::Repr>)> {
        let required = self.derive_fields(required)?;
        let optional = self.derive_fields(optional)?;
        let default = self
            .interpreter
            .object(mode, &required, &optional, meta, self.env)?;
        Ok((default, Children::Fields { required, optional }))
    }

    fn derive_tagged_union(
        &mut self,
        tag: &str,
        variants: &IndexMap<String, Schema>,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<(I::Repr, Children<I::Repr>)> {
        for (value, variant) in variants {
            check_variant_tag(tag, value, variant)?;
        }
        let variants = self.derive_fields(variants)?;
        let default = self.interpreter.tagged_union(tag, &variants, meta, self.env)?;
        Ok((default, Children::Variants(variants)))
    }

    fn derive_union(
        &mut self,
        members: &[Schema],
        discriminators: &[Discriminator],
        meta: &NodeMeta<'_>,
    ) -> SummonResult<(I::Repr, Children<I::Repr>)> {
        if members.len() != discriminators.len() {
            return Err(SummonError::MalformedUnion {
                members: members.len(),
                discriminators: discriminators.len(),
            });
        }
        let members = self.derive_all(members)?;
        let default = self
            .interpreter
            .union(&members, discriminators, meta, self.env)?;
        Ok((default, Children::Members(members)))
    }

    fn derive_fields(
        &mut self,
        fields: &IndexMap<String, Schema>,
    ) -> SummonResult<IndexMap<String, I::Repr>> {
        fields
            .iter()
            .map(|(name, schema)| Ok((name.clone(), self.derive(schema)?)))
            .collect()
    }

    fn derive_all(&mut self, schemas: &[Schema]) -> SummonResult<Vec<I::Repr>> {
        schemas.iter().map(|schema| self.derive(schema)).collect()
    }

    /// Binds a fresh slot for `anchor`, derives the body, applies the
    /// node's override and fills the slot with the result.
    fn derive_recursive(
        &mut self,
        anchor: &Arc<RecursiveAnchor>,
        schema: &Schema,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<I::Repr> {
        let name = anchor.name();
        if !recursive::is_guarded(anchor) {
            return Err(SummonError::UnguardedRecursion {
                name: name.to_string(),
            });
        }
        let body = anchor
            .body()
            .ok_or_else(|| SummonError::DanglingSelfReference {
                name: name.to_string(),
            })?;

        debug!(name, "resolving recursive definition");
        let slot = Deferred::new();
        let previous = self.pending.insert(anchor.id(), slot.clone());
        let result = self.derive(body).and_then(|body| {
            let default = self.interpreter.recursive(name, &body, meta, self.env)?;
            schema
                .config()
                .apply(I::KIND, meta, default, self.env, || Children::Single(body))
        });
        match previous {
            Some(previous) => self.pending.insert(anchor.id(), previous),
            None => self.pending.remove(&anchor.id()),
        };
        let repr = result?;

        slot.fill(repr.clone());
        let bound = (anchor.id(), slot.id());
        if let Some(frame) = self.frames.last_mut() {
            frame.reads.retain(|binding| *binding != bound);
        }
        Ok(repr)
    }

    fn derive_self_reference(
        &mut self,
        self_ref: &SelfRef,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<I::Repr> {
        if let Some(slot) = self.pending.get(&self_ref.anchor_id()).cloned() {
            self.record(&[(self_ref.anchor_id(), slot.id())]);
            return self
                .interpreter
                .self_reference(self_ref.name(), slot, meta, self.env);
        }

        // The placeholder escaped its definition: unfold the definition
        // again from here.
        let anchor = self_ref
            .anchor()
            .ok_or_else(|| SummonError::DanglingSelfReference {
                name: self_ref.name().to_string(),
            })?;
        debug!(name = self_ref.name(), "self reference used outside its definition");
        self.retained.push(Arc::clone(&anchor));
        let schema = Schema::from_kind(NodeKind::Recursive(Arc::clone(&anchor)));
        let meta = NodeMeta::of(&schema);
        self.derive_recursive(&anchor, &schema, &meta)
    }
}

/// Checks that `variant` declares `tag` as the string literal `expected`.
fn check_variant_tag(tag: &str, expected: &str, variant: &Schema) -> SummonResult<()> {
    match declared_tag(tag, variant, &mut HashSet::new()) {
        Ok(declared) if declared == expected => Ok(()),
        Ok(declared) => Err(SummonError::malformed_tagged_union(
            tag,
            expected,
            format!("declares '{}' instead", declared),
        )),
        Err(reason) => Err(SummonError::malformed_tagged_union(tag, expected, reason)),
    }
}

/// The literal value a variant schema declares for `tag`.
fn declared_tag(tag: &str, schema: &Schema, seen: &mut HashSet<usize>) -> Result<String, String> {
    match schema.kind() {
        NodeKind::Object {
            required, optional, ..
        } => match required.get(tag) {
            Some(field) => literal_of(field).ok_or_else(|| {
                format!("declares '{}' as {}, not a string literal", tag, field.label())
            }),
            None if optional.contains_key(tag) => {
                Err(format!("declares '{}' as an optional field", tag))
            }
            None => Err(format!("does not declare '{}'", tag)),
        },
        NodeKind::Newtype { underlying, .. } => declared_tag(tag, underlying, seen),
        NodeKind::Refined { base, .. } => declared_tag(tag, base, seen),
        NodeKind::Recursive(anchor) => {
            if !seen.insert(anchor.id()) {
                return Err(format!("does not declare '{}'", tag));
            }
            match anchor.body() {
                Some(body) => declared_tag(tag, body, seen),
                None => Err("has an unresolved recursive body".to_string()),
            }
        }
        NodeKind::SelfRef(self_ref) => match self_ref.anchor() {
            Some(anchor) => {
                let schema = Schema::from_kind(NodeKind::Recursive(anchor));
                declared_tag(tag, &schema, seen)
            }
            None => Err("refers to a dropped recursive definition".to_string()),
        },
        NodeKind::Intersection(members) => {
            let mut last = Err(format!("does not declare '{}'", tag));
            for member in members {
                match declared_tag(tag, member, seen) {
                    Ok(value) => return Ok(value),
                    Err(reason) => last = Err(reason),
                }
            }
            last
        }
        NodeKind::Union { members, .. } => {
            let mut values = members
                .iter()
                .map(|member| declared_tag(tag, member, seen))
                .collect::<Result<Vec<_>, _>>()?;
            values.sort();
            values.dedup();
            match values.as_slice() {
                [value] => Ok(value.clone()),
                [] => Err(format!("does not declare '{}'", tag)),
                _ => Err(format!("declares several values for '{}'", tag)),
            }
        }
        _ => Err(format!("is a {}, not an object", schema.kind().label())),
    }
}

fn literal_of(schema: &Schema) -> Option<String> {
    match schema.kind() {
        NodeKind::StringLiteral(value) => Some(value.clone()),
        NodeKind::KeysOf(keys) if keys.len() == 1 => keys.first().cloned(),
        NodeKind::Newtype { underlying, .. } => literal_of(underlying),
        NodeKind::Refined { base, .. } => literal_of(base),
        _ => None,
    }
}
