//! Integration tests for the summoning engine.
//!
//! Two small interpreters drive the engine from outside the crate:
//! - `Describe` renders a schema to a TypeScript-like type expression;
//! - `Unfold` counts how many object layers a recursive schema unfolds to,
//!   reading self references through their deferred slot at call time.

use std::sync::Arc;

use indexmap::IndexMap;
use morphic::{
    summon, Deferred, Discriminator, Environment, Interpreter, NodeConfig, NodeMeta, ObjectMode,
    Override, PrimitiveKind, Schema, SummonError, SummonResult, Summoner, DEFAULT_MAX_DEPTH,
};

// =============================================================================
// Describe
// =============================================================================

struct Describe;

impl Interpreter for Describe {
    type Repr = String;
    const KIND: &'static str = "Describe";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(kind.to_string())
    }

    fn string_literal(
        &self,
        value: &str,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(format!("{:?}", value))
    }

    fn array(&self, element: &String, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<String> {
        Ok(format!("{}[]", element))
    }

    fn option(&self, inner: &String, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<String> {
        Ok(format!("{} | none", inner))
    }

    fn newtype(
        &self,
        name: &str,
        _: &String,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(name.to_string())
    }

    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, String>,
        optional: &IndexMap<String, String>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        let fields: Vec<String> = required
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .chain(optional.iter().map(|(k, v)| format!("{}?: {}", k, v)))
            .collect();
        Ok(format!("{{ {} }}", fields.join(", ")))
    }

    fn tagged_union(
        &self,
        _: &str,
        variants: &IndexMap<String, String>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(variants.values().cloned().collect::<Vec<_>>().join(" | "))
    }

    fn union(
        &self,
        members: &[String],
        _: &[Discriminator],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(members.join(" | "))
    }

    fn intersection(
        &self,
        members: &[String],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(members.join(" & "))
    }

    fn recursive(
        &self,
        name: &str,
        body: &String,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(format!("{} = {}", name, body))
    }

    fn self_reference(
        &self,
        name: &str,
        _: Deferred<String>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<String> {
        Ok(name.to_string())
    }
}

#[test]
fn test_describe_nested_schema() {
    let schema = Schema::both(
        [("type", Schema::string_literal("user"))],
        [
            ("tags", Schema::array(Schema::string())),
            ("id", Schema::newtype("UserId", Schema::uuid())),
        ],
    );
    let out = summon(&Describe, &schema, &Environment::new()).unwrap();
    assert_eq!(out, r#"{ type: "user", tags?: string[], id?: UserId }"#);
}

#[test]
fn test_override_sees_children() {
    let config = NodeConfig::named("Pair").with_override::<Describe>(Override::compose(
        |_, _, children| {
            let fields = children.required().map(|f| f.len()).unwrap_or_default();
            format!("Pair<{}>", fields)
        },
    ));
    let schema =
        Schema::interface([("a", Schema::string()), ("b", Schema::number())]).with_config(config);
    assert_eq!(summon(&Describe, &schema, &Environment::new()).unwrap(), "Pair<2>");
}

#[test]
fn test_override_reads_environment() {
    #[derive(Clone, Default)]
    struct Prefix(&'static str);

    let schema = Schema::string().with_config(NodeConfig::new().with_override::<Describe>(
        Override::transform(|default, env| {
            format!("{}{}", env.get_or_default::<Prefix>().0, default)
        }),
    ));
    let env = Environment::new().with(Prefix("my_"));
    assert_eq!(summon(&Describe, &schema, &env).unwrap(), "my_string");
}

#[test]
fn test_shared_subtree_keeps_overrides_per_node() {
    let base = Schema::string();
    let loud = base.clone().with_config(
        NodeConfig::new().with_override::<Describe>(Override::transform(|d: String, _| d.to_uppercase())),
    );
    let schema = Schema::interface([("a", base.clone()), ("b", loud), ("c", base)]);
    assert_eq!(
        summon(&Describe, &schema, &Environment::new()).unwrap(),
        "{ a: string, b: STRING, c: string }"
    );
}

#[test]
fn test_config_mismatch_is_reported() {
    let schema = Schema::interface([(
        "a",
        Schema::string().with_config(NodeConfig::named("A").with_erased(
            "Describe",
            Arc::new(Override::<usize>::constant(1)),
        )),
    )]);
    let err = summon(&Describe, &schema, &Environment::new()).unwrap_err();
    assert_eq!(
        err,
        SummonError::ConfigMismatch {
            kind: "Describe",
            node: "string 'A'".to_string()
        }
    );
}

#[test]
fn test_missing_derivation_names_node() {
    let schema = Schema::record(Schema::string(), Schema::number()).named("Scores");
    let err = summon(&Describe, &schema, &Environment::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "interpreter 'Describe' has no derivation for record 'Scores'"
    );
}

#[test]
fn test_describe_recursive_schema() {
    let list = Schema::recursive("List", |this| {
        Schema::interface([("head", Schema::string()), ("tail", Schema::option(this))])
    });
    assert_eq!(
        summon(&Describe, &list, &Environment::new()).unwrap(),
        "List = { head: string, tail: List | none }"
    );
}

#[test]
fn test_malformed_variant_inside_recursion() {
    let tree = Schema::recursive("Tree", |this| {
        Schema::tagged_union(
            "kind",
            [
                (
                    "node",
                    Schema::interface([
                        ("kind", Schema::string_literal("node")),
                        ("children", Schema::array(this)),
                    ]),
                ),
                ("leaf", Schema::interface([("kind", Schema::string())])),
            ],
        )
    });
    let err = summon(&Describe, &tree, &Environment::new()).unwrap_err();
    assert!(matches!(
        err,
        SummonError::MalformedTaggedUnion { ref variant, .. } if variant == "leaf"
    ));
    assert!(err.is_schema_error());
}

#[test]
fn test_dangling_self_reference() {
    let mut escaped = None;
    let list = Schema::recursive("List", |this| {
        escaped = Some(this.clone());
        Schema::array(this)
    });
    let escaped = escaped.unwrap();

    let alive = summon(&Describe, &Schema::array(escaped.clone()), &Environment::new()).unwrap();
    assert_eq!(alive, "List = List[][]");

    drop(list);
    let err = summon(&Describe, &escaped, &Environment::new()).unwrap_err();
    assert_eq!(
        err,
        SummonError::DanglingSelfReference {
            name: "List".to_string()
        }
    );
}

// =============================================================================
// Unfold
// =============================================================================

type Counter = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// `repr(n)` counts object layers reachable through at most `n` self
/// references.
struct Unfold;

impl Interpreter for Unfold {
    type Repr = Counter;
    const KIND: &'static str = "Unfold";

    fn primitive(
        &self,
        _: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Counter> {
        Ok(Arc::new(|_: usize| 0))
    }

    fn option(&self, inner: &Counter, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Counter> {
        Ok(inner.clone())
    }

    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, Counter>,
        optional: &IndexMap<String, Counter>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Counter> {
        let fields: Vec<Counter> = required.values().chain(optional.values()).cloned().collect();
        Ok(Arc::new(move |n: usize| {
            1 + fields.iter().map(|f| f(n)).max().unwrap_or(0)
        }))
    }

    fn self_reference(
        &self,
        _: &str,
        deferred: Deferred<Counter>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Counter> {
        Ok(Arc::new(move |n: usize| match (n, deferred.get()) {
            (0, _) | (_, None) => 0,
            (n, Some(repr)) => repr(n - 1),
        }))
    }
}

fn list() -> Schema {
    Schema::recursive("List", |this| {
        Schema::interface([("head", Schema::number()), ("tail", Schema::option(this))])
    })
}

#[test]
fn test_deferred_slot_is_filled_after_summon() {
    let counter = summon(&Unfold, &list(), &Environment::new()).unwrap();
    assert_eq!(counter(0), 1);
    assert_eq!(counter(3), 4);
}

#[test]
fn test_recursive_override_is_seen_through_self_references() {
    let doubled = list().with_config(NodeConfig::named("List").with_override::<Unfold>(
        Override::transform(|inner: Counter, _| Arc::new(move |n: usize| 2 * inner(n)) as Counter),
    ));
    let counter = summon(&Unfold, &doubled, &Environment::new()).unwrap();
    // Each layer doubles the count of the layers below it.
    assert_eq!(counter(0), 2);
    assert_eq!(counter(1), 2 * (1 + 2));
}

#[test]
fn test_configured_copies_of_one_definition_stay_apart() {
    let plain = list();
    let doubled = plain.clone().with_config(NodeConfig::named("List").with_override::<Unfold>(
        Override::transform(|inner: Counter, _| Arc::new(move |n: usize| 2 * inner(n)) as Counter),
    ));
    let schema = Schema::interface([("plain", plain), ("doubled", doubled)]);
    let Split { plain, doubled } = split(&schema);
    assert_eq!(plain(2), 3);
    assert_eq!(doubled(1), 6);
}

struct Split {
    plain: Counter,
    doubled: Counter,
}

/// Summons both fields of `schema` in one pass and pulls them back out
/// through a capturing override.
fn split(schema: &Schema) -> Split {
    let captured = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&captured);
    let schema = schema.clone().with_config(NodeConfig::new().with_override::<Unfold>(
        Override::<Counter>::compose(move |default, _, children| {
            let field = |name: &str| {
                children
                    .field(name)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(|_: usize| 0usize) as Counter)
            };
            *sink.lock().unwrap() = Some(Split {
                plain: field("plain"),
                doubled: field("doubled"),
            });
            default
        }),
    ));
    summon(&Unfold, &schema, &Environment::new()).unwrap();
    let fields = captured.lock().unwrap().take().unwrap();
    fields
}

#[test]
fn test_deep_schema_hits_depth_limit() {
    let mut schema = Schema::number();
    for _ in 0..40 {
        schema = Schema::interface([("next", schema)]);
    }
    let env = Environment::new();
    let summoner = Summoner::new(&env);
    assert!(summoner.summon(&Unfold, &schema).is_ok());

    let err = summoner
        .with_config(morphic::SummonConfig::new().with_max_depth(16))
        .summon(&Unfold, &schema)
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, SummonError::DepthExceeded { limit: 16, .. }));
}

// =============================================================================
// Stack depth and threads
// =============================================================================

/// `levels` nested objects around a number.
fn chain(levels: usize) -> Schema {
    (0..levels).fold(Schema::number(), |inner, _| {
        Schema::interface([("next", inner)])
    })
}

#[test]
fn test_default_depth_limit_fires_on_spawned_thread() {
    // Spawned threads get the default 2 MiB stack.
    let handle = std::thread::spawn(|| {
        let env = Environment::new();
        let at_limit = summon(&Unfold, &chain(DEFAULT_MAX_DEPTH - 1), &env).map(|c| c(0));
        let over = summon(&Unfold, &chain(DEFAULT_MAX_DEPTH), &env).map(|c| c(0));
        let far_over = summon(&Describe, &chain(300), &env).map(|s| s.len());
        (at_limit, over, far_over)
    });
    let (at_limit, over, far_over) = handle.join().unwrap();

    assert_eq!(at_limit, Ok(DEFAULT_MAX_DEPTH - 1));
    for err in [over.unwrap_err(), far_over.unwrap_err()] {
        let SummonError::DepthExceeded { limit, path } = err else {
            panic!("expected depth error");
        };
        assert_eq!(limit, DEFAULT_MAX_DEPTH);
        assert!(path.starts_with("interface > interface"));
    }
}

#[test]
fn test_concurrent_summons_share_one_schema() {
    let schema = list();
    let results: Vec<(String, usize)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let env = Environment::new();
                    let described = summon(&Describe, &schema, &env).unwrap();
                    let counter = summon(&Unfold, &schema, &env).unwrap();
                    (described, counter(5))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(results.len(), 8);
    for result in &results {
        assert_eq!(result.0, "List = { head: number, tail: List | none }");
        assert_eq!(result.1, 6);
    }
}

#[test]
fn test_summoned_representation_is_shared_across_threads() {
    let doubled = list().with_config(NodeConfig::named("List").with_override::<Unfold>(
        Override::transform(|inner: Counter, _| Arc::new(move |n: usize| 2 * inner(n)) as Counter),
    ));
    let counter = summon(&Unfold, &doubled, &Environment::new()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let schema = doubled.clone();
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                let own = summon(&Unfold, &schema, &Environment::new()).unwrap();
                (counter(n), own(n))
            })
        })
        .collect();
    for handle in handles {
        let (shared, own) = handle.join().unwrap();
        assert_eq!(shared, own);
    }
}
