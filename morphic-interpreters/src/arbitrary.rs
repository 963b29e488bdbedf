//! Random value generation.
//!
//! An [`Arbitrary`] generates values conforming to its schema, drawing all
//! randomness from a proptest [`TestRunner`]. It can be consumed three ways:
//!
//! - [`Arbitrary::samples`]: a lazy, restartable, infinite iterator;
//! - [`Arbitrary::sample`]: a fixed number of values;
//! - as a proptest [`Strategy`], inside `proptest!` blocks.
//!
//! Generated values do not shrink. The strategy hands out each value as a
//! [`Just`], so a failing `proptest!` case reports the value as generated
//! rather than a minimized one.
//!
//! Sizes come from the [`ArbitraryConfig`] found in the environment at
//! summon time, and can be changed for a single node with an override such
//! as [`bounded_array`].
//!
//! Recursive schemas stay finite: every pass through a self reference counts
//! as one level, and past `max_depth` levels arrays become empty, options
//! become `none`, optional fields are left out and unions only pick members
//! that do not recurse (when they have any).

use std::cmp;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use morphic::{
    Comparator, Deferred, Discriminator, Environment, Interpreter, NodeMeta, Object, ObjectMode,
    Override, PrimitiveKind, Refinement, SummonResult, Value,
};
use proptest::prelude::{any, Strategy};
use proptest::strategy::{Just, NewTree, ValueTree};
use proptest::test_runner::{Config as RunnerConfig, RngAlgorithm, TestRng, TestRunner};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Result type alias for generation.
pub type ArbitraryResult<T> = Result<T, ArbitraryError>;

/// Generation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbitraryError {
    /// No generated base value satisfied the refinement.
    #[error("refinement '{refinement}' rejected {attempts} generated values")]
    RefinementExhausted { refinement: String, attempts: usize },

    /// A node with nothing to choose from (empty keys, variants or members).
    #[error("{node} has no alternatives to generate from")]
    NoAlternatives { node: String },

    /// A record key schema produced a value that cannot name a field.
    #[error("{node} generated a {kind} key, expected a string or uuid")]
    UnsupportedKey { node: String, kind: &'static str },

    /// A self reference used before its definition was summoned.
    #[error("self reference to '{name}' is not resolved")]
    Unresolved { name: String },

    /// The underlying proptest strategy failed.
    #[error("strategy failed: {0}")]
    Strategy(String),
}

/// Inclusive size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: usize,
    pub max: usize,
}

impl Bounds {
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }
}

/// Generation settings, read from the environment when summoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitraryConfig {
    /// Self-reference levels before recursive structure is cut off.
    pub max_depth: usize,
    pub array_len: Bounds,
    pub string_len: Bounds,
    pub record_len: Bounds,
    /// Attempts a refined generator makes before giving up.
    pub refinement_retries: usize,
    /// Seed for [`Arbitrary::samples`]; `None` seeds from the environment.
    pub seed: Option<u64>,
}

impl Default for ArbitraryConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            array_len: Bounds::new(0, 5),
            string_len: Bounds::new(0, 10),
            record_len: Bounds::new(0, 3),
            refinement_retries: 100,
            seed: None,
        }
    }
}

impl ArbitraryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_array_len(mut self, min: usize, max: usize) -> Self {
        self.array_len = Bounds::new(min, max);
        self
    }

    pub fn with_string_len(mut self, min: usize, max: usize) -> Self {
        self.string_len = Bounds::new(min, max);
        self
    }

    pub fn with_record_len(mut self, min: usize, max: usize) -> Self {
        self.record_len = Bounds::new(min, max);
        self
    }

    pub fn with_refinement_retries(mut self, retries: usize) -> Self {
        self.refinement_retries = retries;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn runner(&self) -> TestRunner {
        match self.seed {
            Some(seed) => {
                let mut bytes = [0u8; 32];
                for chunk in bytes.chunks_mut(8) {
                    chunk.copy_from_slice(&seed.to_le_bytes());
                }
                TestRunner::new_with_rng(
                    RunnerConfig::default(),
                    TestRng::from_seed(RngAlgorithm::ChaCha, &bytes),
                )
            }
            None => TestRunner::default(),
        }
    }
}

/// Source of randomness and recursion depth for one generated value.
pub struct Gen<'r> {
    runner: &'r mut TestRunner,
    depth: usize,
}

impl<'r> Gen<'r> {
    pub fn new(runner: &'r mut TestRunner) -> Self {
        Self { runner, depth: 0 }
    }

    /// Draw one value from a proptest strategy.
    pub fn draw<S: Strategy>(&mut self, strategy: &S) -> ArbitraryResult<S::Value> {
        strategy
            .new_tree(&mut *self.runner)
            .map(|tree| tree.current())
            .map_err(|reason| ArbitraryError::Strategy(reason.message().to_string()))
    }

    /// Uniform index below `len`.
    pub fn index(&mut self, len: usize) -> ArbitraryResult<usize> {
        self.draw(&(0..len))
    }

    pub fn coin(&mut self) -> ArbitraryResult<bool> {
        self.draw(&any::<bool>())
    }

    pub fn len_in(&mut self, bounds: Bounds) -> ArbitraryResult<usize> {
        self.draw(&(bounds.min..=bounds.max))
    }

    /// Self-reference levels entered so far.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }
}

type GenFn = dyn Fn(&mut Gen<'_>) -> ArbitraryResult<Value> + Send + Sync;

/// A derived generator.
#[derive(Clone)]
pub struct Arbitrary {
    gen: Arc<GenFn>,
    recursive: bool,
}

impl Arbitrary {
    pub fn new(f: impl Fn(&mut Gen<'_>) -> ArbitraryResult<Value> + Send + Sync + 'static) -> Self {
        Self {
            gen: Arc::new(f),
            recursive: false,
        }
    }

    /// Generator backed by a proptest strategy.
    pub fn from_strategy<S>(strategy: S) -> Self
    where
        S: Strategy<Value = Value> + Send + Sync + 'static,
    {
        Self::new(move |gen| gen.draw(&strategy))
    }

    /// Uniform choice among fixed values.
    pub fn one_of(values: Vec<Value>) -> Self {
        Self::new(move |gen| {
            if values.is_empty() {
                return Err(ArbitraryError::NoAlternatives {
                    node: "one_of".to_string(),
                });
            }
            let i = gen.index(values.len())?;
            Ok(values[i].clone())
        })
    }

    pub fn constant(value: Value) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }

    /// Array generator with explicit length bounds.
    pub fn array(element: &Arbitrary, min: usize, max: usize) -> Self {
        let element = element.clone();
        let bounds = Bounds::new(min, max);
        Self::new(move |gen| {
            let len = gen.len_in(bounds)?;
            (0..len)
                .map(|_| element.generate(gen))
                .collect::<ArbitraryResult<Vec<_>>>()
                .map(Value::Array)
        })
    }

    /// Returns true if generation can pass through a self reference.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn generate(&self, gen: &mut Gen<'_>) -> ArbitraryResult<Value> {
        (self.gen)(gen)
    }

    /// Lazy, infinite stream of values. Restarting with the same seeded
    /// config yields the same stream.
    pub fn samples(&self, config: &ArbitraryConfig) -> Samples {
        Samples {
            arbitrary: self.clone(),
            runner: config.runner(),
        }
    }

    pub fn sample(&self, count: usize, config: &ArbitraryConfig) -> ArbitraryResult<Vec<Value>> {
        self.samples(config).take(count).collect()
    }

    fn marked(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

impl fmt::Debug for Arbitrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbitrary")
            .field("recursive", &self.recursive)
            .finish()
    }
}

/// Each tree holds one finished value and never simplifies.
impl Strategy for Arbitrary {
    type Tree = Just<Value>;
    type Value = Value;

    fn new_tree(&self, runner: &mut TestRunner) -> NewTree<Self> {
        let mut gen = Gen::new(runner);
        self.generate(&mut gen)
            .map(Just)
            .map_err(|err| err.to_string().into())
    }
}

/// Iterator returned by [`Arbitrary::samples`].
pub struct Samples {
    arbitrary: Arbitrary,
    runner: TestRunner,
}

impl Iterator for Samples {
    type Item = ArbitraryResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut gen = Gen::new(&mut self.runner);
        Some(self.arbitrary.generate(&mut gen))
    }
}

/// Override that bounds the length of one array node.
pub fn bounded_array(min: usize, max: usize) -> Override<Arbitrary> {
    Override::compose(move |default, _, children| match children.single() {
        Some(element) => Arbitrary::array(element, min, max).marked(element.is_recursive()),
        None => default,
    })
}

fn no_alternatives(meta: &NodeMeta<'_>) -> ArbitraryError {
    ArbitraryError::NoAlternatives { node: meta.label() }
}

/// Indices a choice may use: past the depth limit, only non-recursive
/// alternatives when there are any.
fn choices(alternatives: &[Arbitrary], exhausted: bool) -> Vec<usize> {
    let all: Vec<usize> = (0..alternatives.len()).collect();
    if !exhausted {
        return all;
    }
    let finite: Vec<usize> = all
        .iter()
        .copied()
        .filter(|&i| !alternatives[i].is_recursive())
        .collect();
    if finite.is_empty() {
        all
    } else {
        finite
    }
}

fn pick(
    gen: &mut Gen<'_>,
    alternatives: &[Arbitrary],
    max_depth: usize,
) -> ArbitraryResult<Option<usize>> {
    let allowed = choices(alternatives, gen.depth() >= max_depth);
    if allowed.is_empty() {
        return Ok(None);
    }
    let i = gen.index(allowed.len())?;
    Ok(Some(allowed[i]))
}

/// Field name for a generated record key.
fn record_key(key: Value, node: &str) -> ArbitraryResult<String> {
    match key {
        Value::String(key) => Ok(key),
        Value::Uuid(key) => Ok(key.to_string()),
        other => Err(ArbitraryError::UnsupportedKey {
            node: node.to_string(),
            kind: other.type_name(),
        }),
    }
}

/// Interpreter deriving [`Arbitrary`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArbitraryInterpreter;

impl Interpreter for ArbitraryInterpreter {
    type Repr = Arbitrary;
    const KIND: &'static str = "Arbitrary";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let config = env.get_or_default::<ArbitraryConfig>();
        Ok(match kind {
            PrimitiveKind::String => {
                let bounds = config.string_len;
                Arbitrary::new(move |gen| {
                    let chars = proptest::collection::vec(
                        proptest::char::range(' ', '~'),
                        bounds.min..=bounds.max,
                    );
                    gen.draw(&chars).map(|cs| Value::String(cs.into_iter().collect()))
                })
            }
            PrimitiveKind::Number => {
                Arbitrary::new(|gen| gen.draw(&(-1.0e6f64..1.0e6)).map(Value::Number))
            }
            PrimitiveKind::Boolean => Arbitrary::new(|gen| gen.coin().map(Value::Bool)),
            PrimitiveKind::Date => Arbitrary::new(|gen| {
                gen.draw(&(0i64..4_102_444_800_000)).map(Value::date_millis)
            }),
            PrimitiveKind::BigInt => {
                Arbitrary::new(|gen| gen.draw(&any::<i64>()).map(|n| Value::BigInt(n.into())))
            }
            PrimitiveKind::Uuid => Arbitrary::new(|gen| {
                gen.draw(&any::<[u8; 16]>())
                    .map(|bytes| Value::Uuid(uuid::Builder::from_random_bytes(bytes).into_uuid()))
            }),
            PrimitiveKind::Unknown => Arbitrary::new(|gen| {
                Ok(match gen.index(4)? {
                    0 => Value::Null,
                    1 => Value::Bool(gen.coin()?),
                    2 => Value::Number(gen.draw(&(-1000.0f64..1000.0))?),
                    _ => Value::string(format!("u{}", gen.index(1000)?)),
                })
            }),
        })
    }

    fn string_literal(
        &self,
        value: &str,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Arbitrary> {
        Ok(Arbitrary::constant(Value::string(value)))
    }

    fn keys_of(
        &self,
        keys: &[String],
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Arbitrary> {
        let keys = keys.to_vec();
        let err = no_alternatives(meta);
        Ok(Arbitrary::new(move |gen| {
            if keys.is_empty() {
                return Err(err.clone());
            }
            let i = gen.index(keys.len())?;
            Ok(Value::string(keys[i].as_str()))
        }))
    }

    fn nullable(
        &self,
        inner: &Arbitrary,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let max_depth = env.get_or_default::<ArbitraryConfig>().max_depth;
        let inner = inner.clone();
        let recursive = inner.is_recursive();
        Ok(Arbitrary::new(move |gen| {
            if recursive && gen.depth() >= max_depth {
                return Ok(Value::none());
            }
            if gen.coin()? {
                inner.generate(gen).map(Value::some)
            } else {
                Ok(Value::none())
            }
        })
        .marked(recursive))
    }

    fn array(
        &self,
        element: &Arbitrary,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let config = env.get_or_default::<ArbitraryConfig>();
        let (bounds, max_depth) = (config.array_len, config.max_depth);
        let element = element.clone();
        let recursive = element.is_recursive();
        Ok(Arbitrary::new(move |gen| {
            let len = if recursive && gen.depth() >= max_depth {
                0
            } else {
                gen.len_in(bounds)?
            };
            (0..len)
                .map(|_| element.generate(gen))
                .collect::<ArbitraryResult<Vec<_>>>()
                .map(Value::Array)
        })
        .marked(recursive))
    }

    /// Generated elements are sorted and deduplicated by the set's ordering.
    fn set(
        &self,
        element: &Arbitrary,
        ordering: &Comparator,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let items = self.array(element, meta, env)?;
        let recursive = items.is_recursive();
        let ordering = ordering.clone();
        Ok(Arbitrary::new(move |gen| {
            let Value::Array(mut values) = items.generate(gen)? else {
                return Ok(Value::Set(Vec::new()));
            };
            values.sort_by(|a, b| ordering.compare(a, b));
            values.dedup_by(|a, b| ordering.compare(a, b) == cmp::Ordering::Equal);
            Ok(Value::Set(values))
        })
        .marked(recursive))
    }

    /// Uuid keys are written in their hyphenated form. A key drawn twice is
    /// drawn again, at most `refinement_retries` times per record, so a
    /// record only falls short of `record_len.min` when its key space is
    /// smaller than that.
    fn record(
        &self,
        key: &Arbitrary,
        value: &Arbitrary,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let config = env.get_or_default::<ArbitraryConfig>();
        let (bounds, max_depth) = (config.record_len, config.max_depth);
        let retries = config.refinement_retries;
        let node = meta.label();
        let (key, value) = (key.clone(), value.clone());
        let recursive = value.is_recursive();
        Ok(Arbitrary::new(move |gen| {
            let len = if recursive && gen.depth() >= max_depth {
                0
            } else {
                gen.len_in(bounds)?
            };
            let mut entries: IndexMap<String, Value> = IndexMap::new();
            let mut redraws = 0;
            while entries.len() < len {
                let k = record_key(key.generate(gen)?, &node)?;
                if entries.contains_key(&k) {
                    if redraws == retries {
                        warn!(node = %node, len, reached = entries.len(), "record keys exhausted");
                        break;
                    }
                    redraws += 1;
                    continue;
                }
                entries.insert(k, value.generate(gen)?);
            }
            Ok(Value::object(entries))
        })
        .marked(recursive))
    }

    fn newtype(
        &self,
        _: &str,
        underlying: &Arbitrary,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Arbitrary> {
        Ok(underlying.clone())
    }

    /// Required fields are always generated; each optional field is present
    /// half of the time, and never past the depth limit if it recurses.
    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, Arbitrary>,
        optional: &IndexMap<String, Arbitrary>,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let max_depth = env.get_or_default::<ArbitraryConfig>().max_depth;
        let required: Vec<(String, Arbitrary)> =
            required.iter().map(|(k, a)| (k.clone(), a.clone())).collect();
        let optional: Vec<(String, Arbitrary)> =
            optional.iter().map(|(k, a)| (k.clone(), a.clone())).collect();
        let recursive = required
            .iter()
            .chain(&optional)
            .any(|(_, a)| a.is_recursive());
        Ok(Arbitrary::new(move |gen| {
            let object = Object::new();
            for (name, arb) in &required {
                object.set(name.as_str(), arb.generate(gen)?);
            }
            for (name, arb) in &optional {
                if arb.is_recursive() && gen.depth() >= max_depth {
                    continue;
                }
                if gen.coin()? {
                    object.set(name.as_str(), arb.generate(gen)?);
                }
            }
            Ok(Value::Object(object))
        })
        .marked(recursive))
    }

    fn tagged_union(
        &self,
        _: &str,
        variants: &IndexMap<String, Arbitrary>,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let members: Vec<Arbitrary> = variants.values().cloned().collect();
        self.union(&members, &[], meta, env)
    }

    fn union(
        &self,
        members: &[Arbitrary],
        _: &[Discriminator],
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let max_depth = env.get_or_default::<ArbitraryConfig>().max_depth;
        let members = members.to_vec();
        let recursive = members.iter().any(Arbitrary::is_recursive);
        let err = no_alternatives(meta);
        Ok(Arbitrary::new(move |gen| match pick(gen, &members, max_depth)? {
            Some(i) => members[i].generate(gen),
            None => Err(err.clone()),
        })
        .marked(recursive))
    }

    /// Object members are merged into one object; otherwise the last
    /// member's value is kept.
    fn intersection(
        &self,
        members: &[Arbitrary],
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Arbitrary> {
        let members = members.to_vec();
        let recursive = members.iter().any(Arbitrary::is_recursive);
        let err = no_alternatives(meta);
        Ok(Arbitrary::new(move |gen| {
            let merged = Object::new();
            let mut last = None;
            for member in &members {
                let value = member.generate(gen)?;
                if let Some(object) = value.as_object() {
                    for (name, field) in object.snapshot() {
                        merged.set(name, field);
                    }
                }
                last = Some(value);
            }
            match last {
                Some(Value::Object(_)) => Ok(Value::Object(merged)),
                Some(other) => Ok(other),
                None => Err(err.clone()),
            }
        })
        .marked(recursive))
    }

    fn refined(
        &self,
        base: &Arbitrary,
        refinement: &Refinement,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let attempts = env.get_or_default::<ArbitraryConfig>().refinement_retries.max(1);
        let base = base.clone();
        let recursive = base.is_recursive();
        let refinement = refinement.clone();
        Ok(Arbitrary::new(move |gen| {
            for _ in 0..attempts {
                let value = base.generate(gen)?;
                if refinement.test(&value) {
                    return Ok(value);
                }
            }
            warn!(refinement = refinement.name(), attempts, "refinement retry budget exhausted");
            Err(ArbitraryError::RefinementExhausted {
                refinement: refinement.name().to_string(),
                attempts,
            })
        })
        .marked(recursive))
    }

    fn self_reference(
        &self,
        name: &str,
        deferred: Deferred<Arbitrary>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Arbitrary> {
        let name = name.to_string();
        Ok(Arbitrary::new(move |gen| {
            let arb = deferred
                .get()
                .ok_or_else(|| ArbitraryError::Unresolved { name: name.clone() })?;
            gen.nested(|gen| arb.generate(gen))
        })
        .marked(true))
    }

    fn either(
        &self,
        left: &Arbitrary,
        right: &Arbitrary,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        let max_depth = env.get_or_default::<ArbitraryConfig>().max_depth;
        let sides = vec![left.clone(), right.clone()];
        let recursive = left.is_recursive() || right.is_recursive();
        Ok(Arbitrary::new(move |gen| {
            match pick(gen, &sides, max_depth)? {
                Some(0) => sides[0].generate(gen).map(Value::left),
                _ => sides[1].generate(gen).map(Value::right),
            }
        })
        .marked(recursive))
    }

    fn option(
        &self,
        inner: &Arbitrary,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<Arbitrary> {
        self.nullable(inner, meta, env)
    }
}
