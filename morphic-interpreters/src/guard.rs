//! Structural type check.
//!
//! A [`Guard`] answers whether a value has the shape its schema describes,
//! including refinement predicates. Object graphs with cycles are accepted
//! when every object on the cycle conforms.

use std::cmp;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use morphic::{
    Comparator, Deferred, Discriminator, Environment, Interpreter, NodeMeta, ObjectMode,
    PrimitiveKind, Refinement, SummonResult, Value, Visited,
};

type GuardFn = dyn Fn(&Value, &mut Visited) -> bool + Send + Sync;

static NEXT_OP: AtomicUsize = AtomicUsize::new(1 << (usize::BITS - 2));

/// A derived type check.
#[derive(Clone)]
pub struct Guard(Arc<GuardFn>);

impl Guard {
    pub fn new(f: impl Fn(&Value, &mut Visited) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Check from a plain predicate.
    pub fn from_fn(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self::new(move |value, _| f(value))
    }

    pub fn is(&self, value: &Value) -> bool {
        self.is_in(value, &mut Visited::new())
    }

    pub fn is_in(&self, value: &Value, visited: &mut Visited) -> bool {
        (self.0)(value, visited)
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Guard")
    }
}

fn optional_is(inner: &Guard, value: &Value, visited: &mut Visited) -> bool {
    match value {
        Value::Option(None) | Value::Null => true,
        Value::Option(Some(x)) => inner.is_in(x, visited),
        _ => false,
    }
}

/// Interpreter deriving [`Guard`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardInterpreter;

impl Interpreter for GuardInterpreter {
    type Repr = Guard;
    const KIND: &'static str = "Guard";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        Ok(Guard::from_fn(move |value| match kind {
            PrimitiveKind::String => matches!(value, Value::String(_)),
            PrimitiveKind::Number => matches!(value, Value::Number(_)),
            PrimitiveKind::Boolean => matches!(value, Value::Bool(_)),
            PrimitiveKind::Date => matches!(value, Value::Date(_)),
            PrimitiveKind::BigInt => matches!(value, Value::BigInt(_)),
            PrimitiveKind::Uuid => match value {
                Value::Uuid(_) => true,
                Value::String(s) => uuid::Uuid::parse_str(s).is_ok(),
                _ => false,
            },
            PrimitiveKind::Unknown => true,
        }))
    }

    fn string_literal(
        &self,
        literal: &str,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let literal = literal.to_string();
        Ok(Guard::from_fn(move |value| value.as_str() == Some(literal.as_str())))
    }

    fn keys_of(&self, keys: &[String], _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Guard> {
        let keys = keys.to_vec();
        Ok(Guard::from_fn(move |value| {
            value.as_str().is_some_and(|s| keys.iter().any(|k| k == s))
        }))
    }

    fn nullable(&self, inner: &Guard, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Guard> {
        let inner = inner.clone();
        Ok(Guard::new(move |value, visited| optional_is(&inner, value, visited)))
    }

    fn array(&self, element: &Guard, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Guard> {
        let element = element.clone();
        Ok(Guard::new(move |value, visited| match value {
            Value::Array(items) => items.iter().all(|item| element.is_in(item, visited)),
            _ => false,
        }))
    }

    /// Elements conform and no two are equal under the set's ordering.
    fn set(
        &self,
        element: &Guard,
        ordering: &Comparator,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let element = element.clone();
        let ordering = ordering.clone();
        Ok(Guard::new(move |value, visited| match value {
            Value::Set(items) => {
                items.iter().all(|item| element.is_in(item, visited))
                    && items.iter().enumerate().all(|(i, a)| {
                        items[i + 1..]
                            .iter()
                            .all(|b| ordering.compare(a, b) != cmp::Ordering::Equal)
                    })
            }
            _ => false,
        }))
    }

    fn record(
        &self,
        key: &Guard,
        value: &Guard,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let (key_guard, value_guard) = (key.clone(), value.clone());
        let op = NEXT_OP.fetch_add(1, Ordering::Relaxed);
        Ok(Guard::new(move |value, visited| {
            let Some(object) = value.as_object() else {
                return false;
            };
            visited.guard(op, object.id(), object.id(), true, |visited| {
                object.snapshot().iter().all(|(k, v)| {
                    key_guard.is_in(&Value::string(k.as_str()), visited)
                        && value_guard.is_in(v, visited)
                })
            })
        }))
    }

    fn newtype(
        &self,
        _: &str,
        underlying: &Guard,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        Ok(underlying.clone())
    }

    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, Guard>,
        optional: &IndexMap<String, Guard>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let required: Vec<(String, Guard)> =
            required.iter().map(|(k, g)| (k.clone(), g.clone())).collect();
        let optional: Vec<(String, Guard)> =
            optional.iter().map(|(k, g)| (k.clone(), g.clone())).collect();
        let op = NEXT_OP.fetch_add(1, Ordering::Relaxed);
        Ok(Guard::new(move |value, visited| {
            let Some(object) = value.as_object() else {
                return false;
            };
            visited.guard(op, object.id(), object.id(), true, |visited| {
                required.iter().all(|(name, guard)| {
                    object.get(name).is_some_and(|field| guard.is_in(&field, visited))
                }) && optional.iter().all(|(name, guard)| match object.get(name) {
                    Some(field) => guard.is_in(&field, visited),
                    None => true,
                })
            })
        }))
    }

    fn tagged_union(
        &self,
        tag: &str,
        variants: &IndexMap<String, Guard>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let tag = tag.to_string();
        let variants = variants.clone();
        Ok(Guard::new(move |value, visited| {
            let selected = value
                .field(&tag)
                .and_then(|t| t.as_str().and_then(|t| variants.get(t)).cloned());
            selected.is_some_and(|guard| guard.is_in(value, visited))
        }))
    }

    fn union(
        &self,
        members: &[Guard],
        discriminators: &[Discriminator],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let members = members.to_vec();
        let discriminators = discriminators.to_vec();
        Ok(Guard::new(move |value, visited| {
            discriminators
                .iter()
                .position(|d| d.matches(value))
                .and_then(|i| members.get(i))
                .is_some_and(|guard| guard.is_in(value, visited))
        }))
    }

    fn intersection(
        &self,
        members: &[Guard],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let members = members.to_vec();
        Ok(Guard::new(move |value, visited| {
            members.iter().all(|guard| guard.is_in(value, visited))
        }))
    }

    fn refined(
        &self,
        base: &Guard,
        refinement: &Refinement,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let base = base.clone();
        let refinement = refinement.clone();
        Ok(Guard::new(move |value, visited| {
            base.is_in(value, visited) && refinement.test(value)
        }))
    }

    fn self_reference(
        &self,
        _: &str,
        deferred: Deferred<Guard>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        Ok(Guard::new(move |value, visited| {
            deferred.get().is_some_and(|guard| guard.is_in(value, visited))
        }))
    }

    fn either(
        &self,
        left: &Guard,
        right: &Guard,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Guard> {
        let (left, right) = (left.clone(), right.clone());
        Ok(Guard::new(move |value, visited| match value {
            Value::Left(x) => left.is_in(x, visited),
            Value::Right(x) => right.is_in(x, visited),
            _ => false,
        }))
    }

    fn option(&self, inner: &Guard, meta: &NodeMeta<'_>, env: &Environment) -> SummonResult<Guard> {
        self.nullable(inner, meta, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphic::{summon, Schema};

    fn guard_of(schema: &Schema) -> Guard {
        summon(&GuardInterpreter, schema, &Environment::new()).unwrap()
    }

    #[test]
    fn test_both_requires_only_required_fields() {
        let guard = guard_of(&Schema::both(
            [("type", Schema::string_literal("foo"))],
            [("a", Schema::string())],
        ));
        assert!(guard.is(&Value::object([("type", Value::string("foo"))])));
        assert!(!guard.is(&Value::object([("a", Value::string("x"))])));
        assert!(!guard.is(&Value::object([
            ("type", Value::string("foo")),
            ("a", Value::Number(1.0)),
        ])));
    }

    #[test]
    fn test_refinement_is_checked() {
        let positive = Refinement::new("Positive", |v| matches!(v, Value::Number(n) if *n > 0.0));
        let guard = guard_of(&Schema::refined(Schema::number(), positive));
        assert!(guard.is(&Value::Number(1.0)));
        assert!(!guard.is(&Value::Number(-1.0)));
        assert!(!guard.is(&Value::string("1")));
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let ordering = Comparator::by_key(|v| v.as_str().map(str::to_string));
        let guard = guard_of(&Schema::set(Schema::string(), ordering));
        assert!(guard.is(&Value::Set(vec!["a".into(), "b".into()])));
        assert!(!guard.is(&Value::Set(vec!["a".into(), "a".into()])));
    }

    #[test]
    fn test_cyclic_value_conforms_to_recursive_schema() {
        let node = Schema::recursive("Node", |this| {
            Schema::interface([("name", Schema::string()), ("next", this)])
        });
        let guard = guard_of(&node);
        let obj = morphic::Object::build([("name", Value::string("a"))]);
        obj.set("next", obj.clone());
        assert!(guard.is(&Value::Object(obj)));
    }
}
