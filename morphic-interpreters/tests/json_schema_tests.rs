//! JSON Schema export.

use morphic::{summon, Environment, Schema, SummonError};
use morphic_interpreters::{JsonSchema, JsonSchemaConfig, JsonSchemaInterpreter, DRAFT_07};
use serde_json::json;

fn json_of(schema: &Schema, env: &Environment) -> JsonSchema {
    summon(&JsonSchemaInterpreter, schema, env).unwrap()
}

#[test]
fn test_primitives() {
    let env = Environment::new();
    let cases = [
        (Schema::string(), json!({ "type": "string" })),
        (Schema::number(), json!({ "type": "number" })),
        (Schema::boolean(), json!({ "type": "boolean" })),
        (Schema::date(), json!({ "type": "string", "format": "date-time" })),
        (Schema::uuid(), json!({ "type": "string", "format": "uuid" })),
        (Schema::unknown(), json!({})),
    ];
    for (schema, expected) in cases {
        assert_eq!(json_of(&schema, &env).schema(), &expected, "{}", schema.label());
    }
}

#[test]
fn test_partial_object_has_no_required() {
    let schema = Schema::partial([("a", Schema::string()), ("b", Schema::number())]);
    let out = json_of(&schema, &Environment::new());
    assert_eq!(
        out.schema(),
        &json!({
            "type": "object",
            "properties": {
                "a": { "type": "string" },
                "b": { "type": "number" }
            }
        })
    );
}

#[test]
fn test_containers() {
    let env = Environment::new();
    assert_eq!(
        json_of(&Schema::array(Schema::string()), &env).schema(),
        &json!({ "type": "array", "items": { "type": "string" } })
    );
    assert_eq!(
        json_of(&Schema::str_map(Schema::number()), &env).schema(),
        &json!({
            "type": "object",
            "propertyNames": { "type": "string" },
            "additionalProperties": { "type": "number" }
        })
    );
    assert_eq!(
        json_of(&Schema::keys_of(["a", "b"]), &env).schema(),
        &json!({ "type": "string", "enum": ["a", "b"] })
    );
}

#[test]
fn test_tagged_union_is_one_of() {
    let schema = Schema::tagged_union(
        "type",
        [
            ("foo", Schema::interface([("type", Schema::string_literal("foo"))])),
            ("bar", Schema::interface([("type", Schema::string_literal("bar"))])),
        ],
    );
    let out = json_of(&schema, &Environment::new());
    assert_eq!(
        out.schema(),
        &json!({
            "oneOf": [
                {
                    "type": "object",
                    "properties": { "type": { "type": "string", "enum": ["foo"] } },
                    "required": ["type"]
                },
                {
                    "type": "object",
                    "properties": { "type": { "type": "string", "enum": ["bar"] } },
                    "required": ["type"]
                }
            ]
        })
    );
}

#[test]
fn test_recursive_export() {
    let list = Schema::recursive("List", |this| {
        Schema::interface([("head", Schema::number()), ("tail", Schema::nullable(this))])
    });
    let out = json_of(&list, &Environment::new());
    assert_eq!(out.schema(), &json!({ "$ref": "#/definitions/List" }));

    let body = json!({
        "type": "object",
        "properties": {
            "head": { "type": "number" },
            "tail": { "$ref": "#/definitions/List" }
        },
        "required": ["head"]
    });
    let mut expected = body.clone();
    expected["$schema"] = json!(DRAFT_07);
    expected["definitions"] = json!({ "List": body });

    assert_eq!(out.export(&JsonSchemaConfig::default()), expected);
}

#[test]
fn test_config_from_environment() {
    let config = JsonSchemaConfig::new()
        .with_definitions_key("$defs")
        .with_titles(true)
        .with_draft("https://json-schema.org/draft/2020-12/schema");
    let env = Environment::new().with(config.clone());
    let schema = Schema::array(Schema::interface([("id", Schema::uuid())]).named("Item"));

    let out = json_of(&schema, &env);
    assert_eq!(out.schema()["items"], json!({ "$ref": "#/$defs/Item" }));

    let doc = out.export(&config);
    assert_eq!(doc["$schema"], json!("https://json-schema.org/draft/2020-12/schema"));
    assert_eq!(doc["$defs"]["Item"]["title"], json!("Item"));
}

#[test]
fn test_conflicting_names_are_rejected() {
    let schema = Schema::intersection(vec![
        Schema::interface([("a", Schema::string())]).named("Same"),
        Schema::interface([("b", Schema::string())]).named("Same"),
    ]);
    let err = summon(&JsonSchemaInterpreter, &schema, &Environment::new()).unwrap_err();
    assert!(matches!(err, SummonError::Derivation { kind: "JsonSchema", .. }));
    assert!(err.to_string().contains("conflicting definitions for 'Same'"));
}
