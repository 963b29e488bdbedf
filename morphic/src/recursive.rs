//! Fixpoint support for self-referential schemas.
//!
//! A recursive definition is split in two:
//!
//! - the [`RecursiveAnchor`], owned by the `Recursive` node, holding the
//!   single-assignment body produced by the builder;
//! - the [`SelfRef`] placeholder handed to the builder, holding only a weak
//!   pointer back to the anchor so the schema graph never forms an `Arc`
//!   cycle.
//!
//! At derivation time the summoner gives every `Recursive` node a
//! [`Deferred`] slot. Self references inside the body receive that slot while
//! it is still empty; the summoner fills it once the body (and the node's own
//! override) has been derived. Representations only read the slot when they
//! are *used*, which is always after summoning returned.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use crate::node::{NodeKind, Schema};

/// Shared definition site of a recursive schema.
pub struct RecursiveAnchor {
    name: String,
    body: OnceLock<Schema>,
}

impl RecursiveAnchor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved body. Only `None` while the builder is still running.
    pub fn body(&self) -> Option<&Schema> {
        self.body.get()
    }

    pub(crate) fn id(&self) -> usize {
        self as *const Self as usize
    }
}

impl fmt::Debug for RecursiveAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveAnchor")
            .field("name", &self.name)
            .field("body", &self.body.get())
            .finish()
    }
}

/// Placeholder standing for the recursive schema inside its own body.
#[derive(Clone)]
pub struct SelfRef {
    name: String,
    anchor: Weak<RecursiveAnchor>,
}

impl SelfRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The definition this placeholder refers to, if it is still alive.
    pub fn anchor(&self) -> Option<Arc<RecursiveAnchor>> {
        self.anchor.upgrade()
    }

    pub(crate) fn anchor_id(&self) -> usize {
        Weak::as_ptr(&self.anchor) as usize
    }
}

impl fmt::Debug for SelfRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SelfRef").field(&self.name).finish()
    }
}

/// Runs `builder` once with a placeholder and stores its result.
pub(crate) fn define(
    name: String,
    builder: impl FnOnce(Schema) -> Schema,
) -> Arc<RecursiveAnchor> {
    let anchor = Arc::new(RecursiveAnchor {
        name: name.clone(),
        body: OnceLock::new(),
    });
    let placeholder = Schema::from_kind(NodeKind::SelfRef(SelfRef {
        name,
        anchor: Arc::downgrade(&anchor),
    }));
    // The lock is fresh and private to this function.
    let _ = anchor.body.set(builder(placeholder));
    anchor
}

/// Single-assignment slot for the representation of a recursive node.
pub struct Deferred<R>(Arc<OnceLock<R>>);

impl<R> Deferred<R> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    /// The resolved representation, or `None` while derivation is in
    /// progress.
    pub fn get(&self) -> Option<&R> {
        self.0.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.get().is_some()
    }

    pub(crate) fn fill(&self, value: R) {
        let _ = self.0.set(value);
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<R> Clone for Deferred<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<R> fmt::Debug for Deferred<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Returns true if every path from `body` to its own placeholder crosses a
/// node that consumes part of the value (a field, an element, a variant).
pub(crate) fn is_guarded(anchor: &RecursiveAnchor) -> bool {
    match anchor.body() {
        Some(body) => !reaches_unguarded(body, anchor.id(), &mut HashSet::new()),
        None => true,
    }
}

fn reaches_unguarded(schema: &Schema, target: usize, seen: &mut HashSet<usize>) -> bool {
    match schema.kind() {
        NodeKind::SelfRef(self_ref) => self_ref.anchor_id() == target,
        NodeKind::Newtype { underlying, .. } => reaches_unguarded(underlying, target, seen),
        NodeKind::Refined { base, .. } => reaches_unguarded(base, target, seen),
        NodeKind::Union { members, .. } | NodeKind::Intersection(members) => members
            .iter()
            .any(|member| reaches_unguarded(member, target, seen)),
        NodeKind::Recursive(inner) => {
            seen.insert(inner.id())
                && inner
                    .body()
                    .is_some_and(|body| reaches_unguarded(body, target, seen))
        }
        _ => false,
    }
}
