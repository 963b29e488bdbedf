//! Rendering of summoned `Show` representations.
//!
//! Expected output is kept inline with insta; run `cargo insta review` after
//! an intentional format change.

use morphic::{summon, Environment, NodeConfig, Object, Override, Schema, Value};
use morphic_interpreters::{Show, ShowInterpreter};

fn show_of(schema: &Schema) -> Show {
    summon(&ShowInterpreter, schema, &Environment::new()).unwrap()
}

#[test]
fn snapshot_date_and_empty_string() {
    let foo = Schema::interface([("date", Schema::date()), ("a", Schema::string())]).named("Foo");
    let value = Value::object([("date", Value::date_millis(12_345)), ("a", Value::string(""))]);

    insta::assert_snapshot!(
        show_of(&foo).show(&value),
        @r#"{ date: 1970-01-01T00:00:12.345Z, a: "" }"#
    );
}

#[test]
fn snapshot_newtype() {
    let show = show_of(&Schema::newtype("Test", Schema::string()));
    insta::assert_snapshot!(show.show(&"abc".into()), @r#"<Test>("abc")"#);
}

#[test]
fn snapshot_field_override() {
    let password = Schema::string().with_config(
        NodeConfig::new()
            .with_override::<ShowInterpreter>(Override::constant(Show::constant("***"))),
    );
    let schema = Schema::interface([("user", Schema::string()), ("password", password)]);
    let value = Value::object([
        ("user", Value::string("alice")),
        ("password", Value::string("hunter2")),
    ]);

    insta::assert_snapshot!(show_of(&schema).show(&value), @r#"{ user: "alice", password: *** }"#);
}

#[test]
fn snapshot_partial_and_both_absent_fields() {
    let partial = show_of(&Schema::partial([("a", Schema::string()), ("b", Schema::number())]));
    let value = Value::object([("a", Value::string("x"))]);
    insta::assert_snapshot!(partial.show(&value), @r#"{ a: "x", b: undefined }"#);

    let both = show_of(&Schema::both(
        [("type", Schema::string_literal("foo"))],
        [("a", Schema::string())],
    ));
    let value = Value::object([("type", Value::string("foo"))]);
    insta::assert_snapshot!(both.show(&value), @r#"{ type: "foo", a: undefined }"#);
}

#[test]
fn snapshot_either_and_option() {
    let either = show_of(&Schema::either(Schema::string(), Schema::number()));
    insta::assert_snapshot!(either.show(&Value::left("a".into())), @r#"left("a")"#);
    insta::assert_snapshot!(either.show(&Value::right(1.0.into())), @"right(1)");

    let option = show_of(&Schema::option(Schema::string()));
    insta::assert_snapshot!(option.show(&Value::some("a".into())), @r#"some("a")"#);
    insta::assert_snapshot!(option.show(&Value::none()), @"none");
}

#[test]
fn snapshot_records() {
    let str_map = show_of(&Schema::str_map(Schema::string()));
    let value = Value::object([("a", Value::string("x")), ("b", Value::string("y"))]);
    insta::assert_snapshot!(str_map.show(&value), @r#"{ "a": "x", "b": "y" }"#);

    let record = show_of(&Schema::record(Schema::string(), Schema::number()));
    insta::assert_snapshot!(record.show(&Value::object(Vec::<(String, Value)>::new())), @"{}");
}

#[test]
fn snapshot_arrays_and_keys() {
    let keys = show_of(&Schema::array(Schema::keys_of(["a", "b"])));
    let value = Value::Array(vec!["a".into(), "b".into()]);
    insta::assert_snapshot!(keys.show(&value), @r#"["a", "b"]"#);
}

#[test]
fn snapshot_tagged_union_selects_variant() {
    let schema = Schema::tagged_union(
        "type",
        [
            (
                "foo",
                Schema::interface([
                    ("type", Schema::string_literal("foo")),
                    ("a", Schema::string()),
                ]),
            ),
            (
                "bar",
                Schema::interface([
                    ("type", Schema::string_literal("bar")),
                    ("b", Schema::number()),
                ]),
            ),
        ],
    );
    let show = show_of(&schema);
    let bar = Value::object([("type", Value::string("bar")), ("b", Value::Number(2.0))]);
    insta::assert_snapshot!(show.show(&bar), @r#"{ type: "bar", b: 2 }"#);
}

#[test]
fn snapshot_recursive_cycle() {
    let node = Schema::recursive("Node", |this| {
        Schema::interface([("name", Schema::string()), ("next", Schema::nullable(this))])
    });
    let obj = Object::build([("name", Value::string("a"))]);
    obj.set("next", Value::some(Value::Object(obj.clone())));

    insta::assert_snapshot!(
        show_of(&node).show(&Value::Object(obj)),
        @r#"{ name: "a", next: some(<circular>) }"#
    );
}

#[test]
fn test_list_nested_1000_deep() {
    let list = Schema::recursive("List", |this| {
        Schema::tagged_union(
            "type",
            [
                (
                    "cons",
                    Schema::interface([
                        ("type", Schema::string_literal("cons")),
                        ("head", Schema::number()),
                        ("tail", this),
                    ]),
                ),
                ("nil", Schema::interface([("type", Schema::string_literal("nil"))])),
            ],
        )
    });
    let value = (0..1000).fold(Value::object([("type", Value::string("nil"))]), |tail, i| {
        Value::object([
            ("type", Value::string("cons")),
            ("head", Value::Number(i as f64)),
            ("tail", tail),
        ])
    });

    let rendered = show_of(&list).show(&value);
    assert!(rendered.starts_with(r#"{ type: "cons", head: 999, tail: { type: "cons", head: 998"#));
    assert!(rendered.ends_with(&format!(r#"{{ type: "nil" }}{}"#, " }".repeat(1000))));
}
