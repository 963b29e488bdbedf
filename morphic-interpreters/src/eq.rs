//! Equality representation.
//!
//! [`Eq`] is a binary predicate over values. Every `Eq` first checks
//! reference identity, so `equals(v, v)` holds for any `v`, cyclic or not.
//!
//! A derived `Eq` checks what it can on the pair in front of it and hands
//! the pairs of children to [`Pending`] instead of calling their `Eq`
//! directly. [`Eq::equals`] drains that queue in a loop, so the call stack
//! does not grow with the nesting depth of the values. Object pairs are
//! recorded as they are first compared and assumed equal when met again,
//! which makes two distinct cyclic graphs compare by bisimulation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use morphic::{
    Comparator, Deferred, Discriminator, Environment, Interpreter, NodeMeta, Object, ObjectMode,
    PrimitiveKind, Refinement, SummonResult, Value, Visited,
};

type EqFn = dyn Fn(&Value, &Value, &mut Pending) -> bool + Send + Sync;

/// Ids for the object pairs an `Eq` records in [`Pending`]. Values near
/// `usize::MAX` are left to [`Value::deep_eq`].
static NEXT_OP: AtomicUsize = AtomicUsize::new(1);

fn next_op() -> usize {
    NEXT_OP.fetch_add(1, Ordering::Relaxed)
}

/// Comparisons still owed by one [`Eq::equals`] call.
#[derive(Debug, Default)]
pub struct Pending {
    queue: Vec<(Eq, Value, Value)>,
    assumed: Visited,
}

impl Pending {
    /// Queues `eq` on a pair of child values. The enclosing comparison holds
    /// only if this one does.
    pub fn defer(&mut self, eq: &Eq, a: Value, b: Value) {
        self.queue.push((eq.clone(), a, b));
    }

    /// Records that `op` is comparing this pair of objects. Returns false
    /// when it already was, in which case the pair counts as equal.
    pub fn assume(&mut self, op: usize, a: &Object, b: &Object) -> bool {
        self.assumed.enter(op, a.id(), b.id())
    }

    /// Runs `eq` to completion on its own queue, for comparisons whose
    /// failure must not fail the enclosing one, like set membership.
    ///
    /// Pairs assumed so far stay assumed inside the trial; pairs the trial
    /// assumes are discarded with it.
    pub fn trial(&self, eq: &Eq, a: &Value, b: &Value) -> bool {
        let mut trial = Pending {
            queue: Vec::new(),
            assumed: self.assumed.clone(),
        };
        trial.run(eq, a, b)
    }

    fn run(&mut self, eq: &Eq, a: &Value, b: &Value) -> bool {
        if !eq.check(a, b, self) {
            return false;
        }
        // Reversed so children are compared in the order they were queued.
        self.queue.reverse();
        while let Some((eq, a, b)) = self.queue.pop() {
            let mark = self.queue.len();
            if !eq.check(&a, &b, self) {
                return false;
            }
            self.queue[mark..].reverse();
        }
        true
    }
}

/// A derived equality predicate.
#[derive(Clone)]
pub struct Eq(Arc<EqFn>);

impl Eq {
    /// Equality that checks the pair itself and defers its children to
    /// `pending`.
    pub fn new(
        f: impl Fn(&Value, &Value, &mut Pending) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Equality from a plain binary predicate.
    pub fn from_equals(f: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self::new(move |a, b, _| f(a, b))
    }

    /// Equality that accepts every pair.
    pub fn always() -> Self {
        Self::new(|_, _, _| true)
    }

    /// Structural equality of the values themselves.
    pub fn structural() -> Self {
        Self::from_equals(|a, b| a.deep_eq(b))
    }

    /// Both `self` and `other` hold.
    pub fn and(&self, other: &Eq) -> Self {
        let (left, right) = (self.clone(), other.clone());
        Self::new(move |a, b, pending| left.check(a, b, pending) && right.check(a, b, pending))
    }

    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        Pending::default().run(self, a, b)
    }

    /// Checks this pair inside an ongoing comparison. Children may be left
    /// queued on `pending`.
    pub fn check(&self, a: &Value, b: &Value, pending: &mut Pending) -> bool {
        a.same_ref(b) || (self.0)(a, b, pending)
    }
}

impl std::fmt::Debug for Eq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Eq")
    }
}

/// Present/absent view of an optional value. `Null` counts as absent.
fn optional(value: &Value) -> Option<&Value> {
    match value {
        Value::Option(inner) => inner.as_deref(),
        Value::Null => None,
        other => Some(other),
    }
}

/// Elements of an array or set value.
fn elements(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Array(items) | Value::Set(items) => Some(items),
        _ => None,
    }
}

fn contains(eq: &Eq, items: &[Value], item: &Value, pending: &Pending) -> bool {
    items.iter().any(|other| pending.trial(eq, item, other))
}

/// Interpreter deriving [`Eq`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EqInterpreter;

impl Interpreter for EqInterpreter {
    type Repr = Eq;
    const KIND: &'static str = "Eq";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        Ok(match kind {
            PrimitiveKind::Unknown => Eq::structural(),
            _ => Eq::from_equals(|a, b| a.deep_eq(b)),
        })
    }

    fn string_literal(&self, _: &str, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Eq> {
        Ok(Eq::from_equals(|a, b| a.deep_eq(b)))
    }

    fn keys_of(&self, _: &[String], _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Eq> {
        Ok(Eq::from_equals(|a, b| a.deep_eq(b)))
    }

    fn nullable(&self, inner: &Eq, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Eq> {
        let inner = inner.clone();
        Ok(Eq::new(move |a, b, pending| match (optional(a), optional(b)) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                pending.defer(&inner, x.clone(), y.clone());
                true
            }
            _ => false,
        }))
    }

    fn array(&self, element: &Eq, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Eq> {
        let element = element.clone();
        Ok(Eq::new(move |a, b, pending| match (elements(a), elements(b)) {
            (Some(xs), Some(ys)) if xs.len() == ys.len() => {
                for (x, y) in xs.iter().zip(ys) {
                    pending.defer(&element, x.clone(), y.clone());
                }
                true
            }
            _ => false,
        }))
    }

    /// Sets are equal when each includes the other.
    fn set(
        &self,
        element: &Eq,
        _: &Comparator,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let element = element.clone();
        Ok(Eq::new(move |a, b, pending| match (elements(a), elements(b)) {
            (Some(xs), Some(ys)) => {
                xs.iter().all(|x| contains(&element, ys, x, pending))
                    && ys.iter().all(|y| contains(&element, xs, y, pending))
            }
            _ => false,
        }))
    }

    /// Records are equal when they have the same keys and equal values.
    fn record(&self, _: &Eq, value: &Eq, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Eq> {
        let value = value.clone();
        let op = next_op();
        Ok(Eq::new(move |a, b, pending| {
            let (Some(x), Some(y)) = (a.as_object(), b.as_object()) else {
                return false;
            };
            if !pending.assume(op, x, y) {
                return true;
            }
            let (xs, mut ys) = (x.snapshot(), y.snapshot());
            if xs.len() != ys.len() {
                return false;
            }
            for (key, xv) in xs {
                let Some(yv) = ys.swap_remove(&key) else {
                    return false;
                };
                pending.defer(&value, xv, yv);
            }
            true
        }))
    }

    fn newtype(
        &self,
        _: &str,
        underlying: &Eq,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        Ok(underlying.clone())
    }

    /// Compares declared fields only. A field absent on both sides is equal,
    /// absent on one side only is not.
    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, Eq>,
        optional: &IndexMap<String, Eq>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let fields: Vec<(String, Eq)> = required
            .iter()
            .chain(optional)
            .map(|(name, eq)| (name.clone(), eq.clone()))
            .collect();
        let op = next_op();
        Ok(Eq::new(move |a, b, pending| {
            let (Some(x), Some(y)) = (a.as_object(), b.as_object()) else {
                return false;
            };
            if !pending.assume(op, x, y) {
                return true;
            }
            for (name, eq) in &fields {
                match (x.get(name), y.get(name)) {
                    (None, None) => {}
                    (Some(xv), Some(yv)) => pending.defer(eq, xv, yv),
                    _ => return false,
                }
            }
            true
        }))
    }

    /// Different tags are unequal without looking at any other field.
    fn tagged_union(
        &self,
        tag: &str,
        variants: &IndexMap<String, Eq>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let tag = tag.to_string();
        let variants = variants.clone();
        Ok(Eq::new(move |a, b, pending| {
            let (Some(ta), Some(tb)) = (a.field(&tag), b.field(&tag)) else {
                return false;
            };
            match (ta.as_str(), tb.as_str()) {
                (Some(x), Some(y)) if x == y => {
                    variants.get(x).is_some_and(|eq| eq.check(a, b, pending))
                }
                _ => false,
            }
        }))
    }

    /// Both operands must select the same member.
    fn union(
        &self,
        members: &[Eq],
        discriminators: &[Discriminator],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let members = members.to_vec();
        let discriminators = discriminators.to_vec();
        Ok(Eq::new(move |a, b, pending| {
            let select = |v: &Value| discriminators.iter().position(|d| d.matches(v));
            match (select(a), select(b)) {
                (Some(i), Some(j)) if i == j => {
                    members.get(i).is_some_and(|eq| eq.check(a, b, pending))
                }
                _ => false,
            }
        }))
    }

    /// Every member must hold on the same pair of values.
    fn intersection(
        &self,
        members: &[Eq],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let members = members.to_vec();
        Ok(Eq::new(move |a, b, pending| {
            members.iter().all(|eq| eq.check(a, b, pending))
        }))
    }

    fn refined(
        &self,
        base: &Eq,
        _: &Refinement,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        Ok(base.clone())
    }

    fn self_reference(
        &self,
        _: &str,
        deferred: Deferred<Eq>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        Ok(Eq::new(move |a, b, pending| {
            deferred.get().is_some_and(|eq| eq.check(a, b, pending))
        }))
    }

    fn either(
        &self,
        left: &Eq,
        right: &Eq,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Eq> {
        let (left, right) = (left.clone(), right.clone());
        Ok(Eq::new(move |a, b, pending| {
            match (a, b) {
                (Value::Left(x), Value::Left(y)) => {
                    pending.defer(&left, (**x).clone(), (**y).clone())
                }
                (Value::Right(x), Value::Right(y)) => {
                    pending.defer(&right, (**x).clone(), (**y).clone())
                }
                _ => return false,
            }
            true
        }))
    }

    fn option(&self, inner: &Eq, meta: &NodeMeta<'_>, env: &Environment) -> SummonResult<Eq> {
        self.nullable(inner, meta, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphic::{summon, Object, Schema};

    fn eq_of(schema: &Schema) -> Eq {
        summon(&EqInterpreter, schema, &Environment::new()).unwrap()
    }

    #[test]
    fn test_same_ref_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let eq = Eq::from_equals(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });
        let obj = Value::Object(Object::new());
        assert!(eq.equals(&obj, &obj));
        assert!(!eq.equals(&obj, &Value::Object(Object::new())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_ignores_order() {
        let ordering = Comparator::new(|_, _| std::cmp::Ordering::Equal);
        let schema = Schema::set(Schema::number(), ordering);
        let eq = eq_of(&schema);
        let x = Value::Set(vec![1.0.into(), 2.0.into()]);
        let y = Value::Set(vec![2.0.into(), 1.0.into()]);
        let z = Value::Set(vec![2.0.into(), 3.0.into()]);
        assert!(eq.equals(&x, &y));
        assert!(!eq.equals(&x, &z));
    }

    #[test]
    fn test_record_compares_key_sets() {
        let eq = eq_of(&Schema::str_map(Schema::number()));
        let a = Value::object([("a", Value::Number(1.0))]);
        let b = Value::object([("a", Value::Number(1.0))]);
        let c = Value::object([("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        assert!(eq.equals(&a, &b));
        assert!(!eq.equals(&a, &c));
        assert!(!eq.equals(&c, &a));
    }

    #[test]
    fn test_either_and_option() {
        let either = eq_of(&Schema::either(Schema::string(), Schema::number()));
        assert!(either.equals(&Value::left("a".into()), &Value::left("a".into())));
        assert!(!either.equals(&Value::left("1".into()), &Value::right(1.0.into())));

        let option = eq_of(&Schema::option(Schema::string()));
        assert!(option.equals(&Value::none(), &Value::none()));
        assert!(!option.equals(&Value::some("a".into()), &Value::none()));
        assert!(option.equals(&Value::some("a".into()), &Value::some("a".into())));
    }

    #[test]
    fn test_union_requires_same_member() {
        let schema = Schema::union(
            vec![Schema::string(), Schema::number()],
            vec![
                Discriminator::new(|v| matches!(v, Value::String(_))),
                Discriminator::new(|v| matches!(v, Value::Number(_))),
            ],
        );
        let eq = eq_of(&schema);
        assert!(eq.equals(&"a".into(), &"a".into()));
        assert!(!eq.equals(&"1".into(), &1.0.into()));
        assert!(!eq.equals(&Value::Bool(true), &Value::Bool(true)));
    }

    #[test]
    fn test_children_are_compared_in_declared_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recording = |name: &'static str| {
            let seen = Arc::clone(&seen);
            Eq::from_equals(move |a, b| {
                seen.lock().unwrap().push(name);
                a.deep_eq(b)
            })
        };
        let (first, second) = (recording("first"), recording("second"));
        let eq = Eq::new(move |a, b, pending| {
            pending.defer(&first, a.clone(), b.clone());
            pending.defer(&second, a.clone(), b.clone());
            true
        });
        assert!(eq.equals(&1.0.into(), &1.0.into()));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_failed_set_trial_does_not_leak_assumptions() {
        let node = Schema::interface([("a", Schema::number())]);
        let eq = eq_of(&Schema::set(
            node,
            Comparator::new(|_, _| std::cmp::Ordering::Equal),
        ));
        let obj = |n: f64| Value::object([("a", Value::Number(n))]);
        let x = Value::Set(vec![obj(1.0), obj(2.0)]);
        let y = Value::Set(vec![obj(2.0), obj(1.0)]);
        let z = Value::Set(vec![obj(2.0), obj(3.0)]);
        assert!(eq.equals(&x, &y));
        assert!(!eq.equals(&x, &z));
    }
}
