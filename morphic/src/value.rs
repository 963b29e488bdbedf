//! Runtime values described by schemas.
//!
//! [`Value`] is the closed set of shapes a schema can describe. Objects are
//! shared by reference: cloning an [`Object`] aliases it, so object graphs may
//! contain cycles (see [`Object::set`]). Every traversal in this crate and in
//! the interpreters guards against such cycles with a [`Visited`] set.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

/// Insertion-ordered field map of an object.
pub type Fields = IndexMap<String, Value>;

/// Operation id used by [`Value::deep_eq`] when it records visited pairs.
const DEEP_EQ: usize = usize::MAX;

/// A schema-described runtime value.
#[derive(Clone)]
pub enum Value {
    /// JSON-like null, used by the `unknown` primitive.
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    Uuid(Uuid),
    Array(Vec<Value>),
    /// Unordered collection; equality ignores element order.
    Set(Vec<Value>),
    Object(Object),
    /// Present or absent value (`nullable` and `option` nodes).
    Option(Option<Box<Value>>),
    Left(Box<Value>),
    Right(Box<Value>),
}

impl Value {
    /// Create a string value.
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    /// Create a date from milliseconds since the Unix epoch.
    ///
    /// Out-of-range timestamps clamp to the epoch.
    pub fn date_millis(millis: i64) -> Self {
        Value::Date(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    /// Build an object value from plain fields.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Object::build(fields))
    }

    /// A present optional value.
    pub fn some(value: Value) -> Self {
        Value::Option(Some(Box::new(value)))
    }

    /// An absent optional value.
    pub fn none() -> Self {
        Value::Option(None)
    }

    pub fn left(value: Value) -> Self {
        Value::Left(Box::new(value))
    }

    pub fn right(value: Value) -> Self {
        Value::Right(Box::new(value))
    }

    /// Short name of the value's shape, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Uuid(_) => "uuid",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
            Value::Option(_) => "option",
            Value::Left(_) => "left",
            Value::Right(_) => "right",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Read a field if this value is an object that has it.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|o| o.get(name))
    }

    /// Returns true if this value is an object that has the field.
    pub fn has_field(&self, name: &str) -> bool {
        self.as_object().is_some_and(|o| o.contains(name))
    }

    /// Reference identity. Only objects carry identity; every other pair is
    /// never the same reference.
    pub fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Structural equality with a reference short-circuit and cycle detection.
    ///
    /// Pairs of objects already being compared higher up the stack are
    /// assumed equal, so distinct cyclic graphs compare by bisimulation.
    pub fn deep_eq(&self, other: &Value) -> bool {
        self.deep_eq_in(other, &mut Visited::default())
    }

    /// [`Value::deep_eq`] sharing an existing visited set.
    pub fn deep_eq_in(&self, other: &Value, visited: &mut Visited) -> bool {
        if self.same_ref(other) {
            return true;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.deep_eq_in(y, visited))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|x| b.iter().any(|y| x.deep_eq_in(y, visited)))
                    && b.iter().all(|y| a.iter().any(|x| y.deep_eq_in(x, visited)))
            }
            (Value::Object(a), Value::Object(b)) => {
                visited.guard(DEEP_EQ, a.id(), b.id(), true, |visited| {
                    let left = a.snapshot();
                    let right = b.snapshot();
                    left.len() == right.len()
                        && left.iter().all(|(key, x)| {
                            right.get(key).is_some_and(|y| x.deep_eq_in(y, visited))
                        })
                })
            }
            (Value::Option(None), Value::Option(None)) => true,
            (Value::Option(Some(a)), Value::Option(Some(b))) => a.deep_eq_in(b, visited),
            (Value::Left(a), Value::Left(b)) | (Value::Right(a), Value::Right(b)) => {
                a.deep_eq_in(b, visited)
            }
            _ => false,
        }
    }

    fn debug_into(&self, f: &mut fmt::Formatter<'_>, trail: &mut Vec<usize>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({:?})", n),
            Value::BigInt(n) => write!(f, "BigInt({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Date(d) => write!(
                f,
                "Date({})",
                d.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            Value::Uuid(u) => write!(f, "Uuid({})", u),
            Value::Array(items) | Value::Set(items) => {
                let label = if matches!(self, Value::Set(_)) { "Set" } else { "Array" };
                write!(f, "{}[", label)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.debug_into(f, trail)?;
                }
                write!(f, "]")
            }
            Value::Object(o) => {
                if trail.contains(&o.id()) {
                    return write!(f, "<cycle>");
                }
                trail.push(o.id());
                write!(f, "{{")?;
                for (i, (key, value)) in o.snapshot().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.debug_into(f, trail)?;
                }
                trail.pop();
                write!(f, "}}")
            }
            Value::Option(None) => write!(f, "None"),
            Value::Option(Some(v)) => {
                write!(f, "Some(")?;
                v.debug_into(f, trail)?;
                write!(f, ")")
            }
            Value::Left(v) => {
                write!(f, "Left(")?;
                v.debug_into(f, trail)?;
                write!(f, ")")
            }
            Value::Right(v) => {
                write!(f, "Right(")?;
                v.debug_into(f, trail)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug_into(f, &mut Vec::new())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Value::BigInt(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        Value::Option(value.map(|v| Box::new(v.into())))
    }
}

/// A shared, reference-identified object.
///
/// Reads clone fields out of the lock, so callbacks never run while the lock
/// is held and cyclic traversals cannot deadlock.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<Fields>>);

impl Object {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canonical object from plain fields.
    pub fn build<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields: Fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Arc::new(RwLock::new(fields)))
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Set a field, returning the previous value.
    ///
    /// This is the only mutation objects support; it exists so that cyclic
    /// graphs can be tied after construction.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn keys(&self) -> Vec<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Copy of the current fields.
    pub fn snapshot(&self) -> Fields {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity of this object.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Value::Object(self.clone()).debug_into(f, &mut Vec::new())
    }
}

/// Set of `(operation, lhs, rhs)` object pairs currently being traversed.
///
/// Operation ids keep nested traversals over the same pair apart: an
/// intersection runs each member's comparison on the same two objects, and
/// those must not see each other as cycles.
#[derive(Debug, Default, Clone)]
pub struct Visited {
    active: HashSet<(usize, usize, usize)>,
}

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the triple as in progress. Returns false if it already was.
    pub fn enter(&mut self, op: usize, lhs: usize, rhs: usize) -> bool {
        self.active.insert((op, lhs, rhs))
    }

    pub fn leave(&mut self, op: usize, lhs: usize, rhs: usize) {
        self.active.remove(&(op, lhs, rhs));
    }

    /// Runs `f` with the triple marked in progress, or returns `on_cycle`
    /// when the triple is already being traversed.
    pub fn guard<T>(
        &mut self,
        op: usize,
        lhs: usize,
        rhs: usize,
        on_cycle: T,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        if !self.enter(op, lhs, rhs) {
            return on_cycle;
        }
        let result = f(self);
        self.leave(op, lhs, rhs);
        result
    }

    pub fn depth(&self) -> usize {
        self.active.len()
    }
}
