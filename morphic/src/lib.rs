//! # morphic
//!
//! Describe a data shape once, derive many behaviors from it.
//!
//! A [`Schema`] is an immutable tree of node kinds (primitives, objects,
//! tagged and untagged unions, intersections, containers, newtypes,
//! refinements and recursive definitions). An [`Interpreter`] says how to
//! derive one kind of representation (an equality predicate, a renderer, a
//! generator, a JSON schema) for each node kind from the representations of
//! its children. The [`Summoner`] folds a schema with an interpreter,
//! threading an [`Environment`] and applying per-node [`Override`]s.
//!
//! ## Features
//!
//! - **Closed node model**: one sum type, no open hierarchies
//! - **Per-node overrides**: keyed by interpreter, applied bottom-up
//! - **Recursive schemas**: self references are bound to single-assignment
//!   slots, so folding a recursive schema always terminates
//! - **Cyclic values**: [`Object`] values may form reference cycles and every
//!   traversal is cycle-aware
//! - **Fail fast**: composition errors surface when summoning, never as a
//!   partially derived representation
//!
//! ## Quick Start
//!
//! ```rust
//! use morphic::{summon, Environment, Interpreter, NodeMeta, PrimitiveKind, Schema, SummonResult};
//! use indexmap::IndexMap;
//!
//! /// Counts the fields of an object schema.
//! struct FieldCount;
//!
//! impl Interpreter for FieldCount {
//!     type Repr = usize;
//!     const KIND: &'static str = "FieldCount";
//!
//!     fn primitive(
//!         &self,
//!         _: PrimitiveKind,
//!         _: &NodeMeta<'_>,
//!         _: &Environment,
//!     ) -> SummonResult<usize> {
//!         Ok(0)
//!     }
//!
//!     fn object(
//!         &self,
//!         _: morphic::ObjectMode,
//!         required: &IndexMap<String, usize>,
//!         optional: &IndexMap<String, usize>,
//!         _: &NodeMeta<'_>,
//!         _: &Environment,
//!     ) -> SummonResult<usize> {
//!         let nested: usize = required.values().chain(optional.values()).sum();
//!         Ok(required.len() + optional.len() + nested)
//!     }
//! }
//!
//! let schema = Schema::interface([("id", Schema::uuid()), ("name", Schema::string())]);
//! assert_eq!(summon(&FieldCount, &schema, &Environment::new()).unwrap(), 2);
//! ```
//!
//! Concrete interpreters (Eq, Show, Arbitrary, JSON Schema, Guard) live in
//! the `morphic-interpreters` crate.

pub mod config;
pub mod env;
pub mod error;
pub mod interpreter;
pub mod node;
pub mod recursive;
pub mod summon;
pub mod value;

pub use config::{Children, NodeConfig, Override};
pub use env::Environment;
pub use error::{SummonError, SummonResult};
pub use interpreter::{Interpreter, NodeMeta};
pub use node::{
    Comparator, Discriminator, Node, NodeId, NodeKind, ObjectMode, PrimitiveKind, Refinement,
    Schema,
};
pub use recursive::{Deferred, RecursiveAnchor, SelfRef};
pub use summon::{summon, SummonConfig, Summoner, DEFAULT_MAX_DEPTH};
pub use value::{Fields, Object, Value, Visited};
