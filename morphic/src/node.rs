//! Schema node model.
//!
//! A [`Schema`] is an immutable, cheaply cloneable handle on a [`Node`]. The
//! set of node kinds is closed ([`NodeKind`]); composition always builds new
//! nodes and never mutates existing ones. Identity is the address of the
//! shared node ([`NodeId`]), never structural equality, so two structurally
//! identical recursive instantiations stay distinct.
//!
//! ## Constructors
//!
//! | Constructor | Describes |
//! |-------------|-----------|
//! | `Schema::string()`, `number()`, `date()`, `uuid()` and the rest | primitives |
//! | `Schema::string_literal("x")` | exactly the string `"x"` |
//! | `Schema::keys_of(["a", "b"])` | one of a fixed set of strings |
//! | `Schema::nullable(s)` | present or absent `s` |
//! | `Schema::array(s)`, `set(s, cmp)`, `record(k, v)`, `str_map(v)` | containers |
//! | `Schema::newtype("Name", s)` | renamed wrapper, same runtime shape |
//! | `Schema::interface(..)`, `partial(..)`, `both(..)` | objects |
//! | `Schema::tagged_union("type", ..)` | union dispatched on a literal tag field |
//! | `Schema::union(members, discriminators)` | untagged union |
//! | `Schema::intersection(members)` | all members at once |
//! | `Schema::refined(s, refinement)` | runtime-checked narrowing |
//! | `Schema::recursive("Name", \|this\| ..)` | self-referential definition |
//! | `Schema::either(l, r)`, `option(s)` | sum-type conveniences |

use std::cmp;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::recursive::{self, RecursiveAnchor, SelfRef};
use crate::value::Value;

/// Address-based identity of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw identifier.
    pub fn to_raw(self) -> usize {
        self.0
    }
}

/// Primitive node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
    Date,
    BigInt,
    Unknown,
    Uuid,
}

impl PrimitiveKind {
    /// Returns the string representation of the primitive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::BigInt => "bigint",
            Self::Unknown => "unknown",
            Self::Uuid => "uuid",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an object node splits its fields between required and optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectMode {
    /// Every field is required.
    Interface,
    /// Every field is optional.
    Partial,
    /// Split required and optional field maps.
    Both,
}

impl ObjectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interface => "interface",
            Self::Partial => "partial",
            Self::Both => "both",
        }
    }
}

/// Total order used by set nodes to canonicalize and deduplicate elements.
#[derive(Clone)]
pub struct Comparator(Arc<dyn Fn(&Value, &Value) -> cmp::Ordering + Send + Sync>);

impl Comparator {
    pub fn new(f: impl Fn(&Value, &Value) -> cmp::Ordering + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Order values by a projected key.
    pub fn by_key<K: Ord>(key: impl Fn(&Value) -> K + Send + Sync + 'static) -> Self {
        Self::new(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn compare(&self, a: &Value, b: &Value) -> cmp::Ordering {
        (self.0)(a, b)
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparator")
    }
}

/// Membership test for one member of an untagged union.
#[derive(Clone)]
pub struct Discriminator(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl Discriminator {
    pub fn new(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Values that are objects carrying `field`.
    pub fn has_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(move |v| v.has_field(&field))
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.0)(value)
    }
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Discriminator")
    }
}

/// Named runtime predicate carried opaquely by refined nodes.
#[derive(Clone)]
pub struct Refinement {
    name: String,
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Refinement {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }
}

impl fmt::Debug for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Refinement").field(&self.name).finish()
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Primitive(PrimitiveKind),
    StringLiteral(String),
    KeysOf(Vec<String>),
    Nullable(Schema),
    Array(Schema),
    Set {
        element: Schema,
        ordering: Comparator,
    },
    Record {
        key: Schema,
        value: Schema,
    },
    Newtype {
        name: String,
        underlying: Schema,
    },
    Object {
        mode: ObjectMode,
        required: IndexMap<String, Schema>,
        optional: IndexMap<String, Schema>,
    },
    TaggedUnion {
        tag: String,
        variants: IndexMap<String, Schema>,
    },
    Union {
        members: Vec<Schema>,
        discriminators: Vec<Discriminator>,
    },
    Intersection(Vec<Schema>),
    Refined {
        base: Schema,
        refinement: Refinement,
    },
    /// Definition site of a self-referential schema.
    Recursive(Arc<RecursiveAnchor>),
    /// The placeholder a recursive builder receives for "itself".
    SelfRef(SelfRef),
    Either {
        left: Schema,
        right: Schema,
    },
    Option(Schema),
}

impl NodeKind {
    /// Short label of the kind, for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primitive(p) => p.as_str(),
            Self::StringLiteral(_) => "string literal",
            Self::KeysOf(_) => "keys of",
            Self::Nullable(_) => "nullable",
            Self::Array(_) => "array",
            Self::Set { .. } => "set",
            Self::Record { .. } => "record",
            Self::Newtype { .. } => "newtype",
            Self::Object { mode, .. } => mode.as_str(),
            Self::TaggedUnion { .. } => "tagged union",
            Self::Union { .. } => "union",
            Self::Intersection(_) => "intersection",
            Self::Refined { .. } => "refined",
            Self::Recursive(_) => "recursive",
            Self::SelfRef(_) => "self reference",
            Self::Either { .. } => "either",
            Self::Option(_) => "option",
        }
    }
}

/// A schema node: its kind plus its per-node configuration.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    config: NodeConfig,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

/// Immutable handle on a schema node.
#[derive(Clone)]
pub struct Schema(Arc<Node>);

impl Schema {
    /// Create a schema from a kind with an empty configuration.
    pub fn from_kind(kind: NodeKind) -> Self {
        Self::from_parts(kind, NodeConfig::default())
    }

    pub fn from_parts(kind: NodeKind, config: NodeConfig) -> Self {
        Self(Arc::new(Node { kind, config }))
    }

    pub fn id(&self) -> NodeId {
        NodeId(Arc::as_ptr(&self.0) as usize)
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub fn config(&self) -> &NodeConfig {
        &self.0.config
    }

    pub fn name(&self) -> Option<&str> {
        self.0.config.name()
    }

    /// A new node of the same kind carrying `config`.
    ///
    /// The original node is left untouched. Recursive definitions keep their
    /// identity because the kind shares the same recursive anchor.
    pub fn with_config(self, config: NodeConfig) -> Self {
        match Arc::try_unwrap(self.0) {
            Ok(node) => Self::from_parts(node.kind, config),
            Err(shared) => Self::from_parts(shared.kind.clone(), config),
        }
    }

    /// Shortcut for naming a node without any override.
    pub fn named(self, name: impl Into<String>) -> Self {
        let config = self.config().clone().with_name(name);
        self.with_config(config)
    }

    /// Human-readable description, e.g. `interface 'Foo'`.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{} '{}'", self.kind().label(), name),
            None => self.kind().label().to_string(),
        }
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::from_kind(NodeKind::Primitive(kind))
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    pub fn number() -> Self {
        Self::primitive(PrimitiveKind::Number)
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    pub fn date() -> Self {
        Self::primitive(PrimitiveKind::Date)
    }

    pub fn bigint() -> Self {
        Self::primitive(PrimitiveKind::BigInt)
    }

    pub fn unknown() -> Self {
        Self::primitive(PrimitiveKind::Unknown)
    }

    pub fn uuid() -> Self {
        Self::primitive(PrimitiveKind::Uuid)
    }

    pub fn string_literal(value: impl Into<String>) -> Self {
        Self::from_kind(NodeKind::StringLiteral(value.into()))
    }

    /// One of a fixed set of strings. Duplicates are dropped, first one wins.
    pub fn keys_of<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for key in keys.into_iter().map(Into::into) {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self::from_kind(NodeKind::KeysOf(unique))
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub fn nullable(inner: Schema) -> Self {
        Self::from_kind(NodeKind::Nullable(inner))
    }

    pub fn array(element: Schema) -> Self {
        Self::from_kind(NodeKind::Array(element))
    }

    pub fn set(element: Schema, ordering: Comparator) -> Self {
        Self::from_kind(NodeKind::Set { element, ordering })
    }

    pub fn record(key: Schema, value: Schema) -> Self {
        Self::from_kind(NodeKind::Record { key, value })
    }

    /// Record keyed by arbitrary strings.
    pub fn str_map(value: Schema) -> Self {
        Self::record(Self::string(), value)
    }

    pub fn newtype(name: impl Into<String>, underlying: Schema) -> Self {
        Self::from_kind(NodeKind::Newtype {
            name: name.into(),
            underlying,
        })
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Object whose fields are all required.
    pub fn interface<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Self::from_kind(NodeKind::Object {
            mode: ObjectMode::Interface,
            required: collect_fields(fields),
            optional: IndexMap::new(),
        })
    }

    /// Object whose fields are all optional.
    pub fn partial<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Self::from_kind(NodeKind::Object {
            mode: ObjectMode::Partial,
            required: IndexMap::new(),
            optional: collect_fields(fields),
        })
    }

    /// Object with split required and optional fields.
    ///
    /// The two maps are expected to be disjoint; a name present in both is
    /// kept only as required.
    pub fn both<K: Into<String>, P: Into<String>>(
        required: impl IntoIterator<Item = (K, Schema)>,
        optional: impl IntoIterator<Item = (P, Schema)>,
    ) -> Self {
        let required = collect_fields(required);
        let mut optional = collect_fields(optional);
        optional.retain(|name, _| !required.contains_key(name));
        Self::from_kind(NodeKind::Object {
            mode: ObjectMode::Both,
            required,
            optional,
        })
    }

    // =========================================================================
    // Unions and intersections
    // =========================================================================

    pub fn tagged_union<K: Into<String>>(
        tag: impl Into<String>,
        variants: impl IntoIterator<Item = (K, Schema)>,
    ) -> Self {
        Self::from_kind(NodeKind::TaggedUnion {
            tag: tag.into(),
            variants: collect_fields(variants),
        })
    }

    /// Untagged union. `discriminators[i]` decides membership in `members[i]`.
    pub fn union(members: Vec<Schema>, discriminators: Vec<Discriminator>) -> Self {
        Self::from_kind(NodeKind::Union {
            members,
            discriminators,
        })
    }

    pub fn intersection(members: Vec<Schema>) -> Self {
        Self::from_kind(NodeKind::Intersection(members))
    }

    pub fn refined(base: Schema, refinement: Refinement) -> Self {
        Self::from_kind(NodeKind::Refined { base, refinement })
    }

    /// Self-referential schema.
    ///
    /// `builder` runs exactly once and receives a placeholder standing for the
    /// schema being defined:
    ///
    /// ```rust
    /// use morphic::Schema;
    ///
    /// let list = Schema::recursive("List", |this| {
    ///     Schema::tagged_union(
    ///         "type",
    ///         [
    ///             (
    ///                 "cons",
    ///                 Schema::interface([
    ///                     ("type", Schema::string_literal("cons")),
    ///                     ("tail", this),
    ///                 ]),
    ///             ),
    ///             (
    ///                 "leaf",
    ///                 Schema::interface([
    ///                     ("type", Schema::string_literal("leaf")),
    ///                     ("v", Schema::string()),
    ///                 ]),
    ///             ),
    ///         ],
    ///     )
    /// });
    /// assert_eq!(list.label(), "recursive 'List'");
    /// ```
    pub fn recursive(name: impl Into<String>, builder: impl FnOnce(Schema) -> Schema) -> Self {
        let name = name.into();
        let anchor = recursive::define(name.clone(), builder);
        Self::from_parts(NodeKind::Recursive(anchor), NodeConfig::named(name))
    }

    pub fn either(left: Schema, right: Schema) -> Self {
        Self::from_kind(NodeKind::Either { left, right })
    }

    pub fn option(inner: Schema) -> Self {
        Self::from_kind(NodeKind::Option(inner))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn collect_fields<K: Into<String>>(
    fields: impl IntoIterator<Item = (K, Schema)>,
) -> IndexMap<String, Schema> {
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
