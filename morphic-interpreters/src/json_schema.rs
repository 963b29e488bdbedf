//! JSON Schema export.
//!
//! Every node derives a schema fragment plus the named definitions the
//! fragment refers to. Named objects and recursive definitions are emitted
//! once under the definitions key and referenced with `$ref`, which is what
//! lets recursive schemas be exported at all.
//!
//! ```rust,ignore
//! let schema = summon(&JsonSchemaInterpreter, &person, &env)?;
//! let document = schema.export(&JsonSchemaConfig::default());
//! ```

use indexmap::IndexMap;
use morphic::{
    Comparator, Deferred, Discriminator, Environment, Interpreter, NodeMeta, ObjectMode,
    PrimitiveKind, Refinement, SummonError, SummonResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

/// Default `$schema` URI.
pub const DRAFT_07: &str = "http://json-schema.org/draft-07/schema#";

/// Export settings, read from the environment when summoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonSchemaConfig {
    /// Value of `$schema` in exported documents.
    pub draft: String,
    /// Key under which named definitions are collected.
    pub definitions_key: String,
    /// Add a `title` to named objects and newtypes.
    pub include_titles: bool,
}

impl Default for JsonSchemaConfig {
    fn default() -> Self {
        Self {
            draft: DRAFT_07.to_string(),
            definitions_key: "definitions".to_string(),
            include_titles: false,
        }
    }
}

impl JsonSchemaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        self.draft = draft.into();
        self
    }

    pub fn with_definitions_key(mut self, key: impl Into<String>) -> Self {
        self.definitions_key = key.into();
        self
    }

    pub fn with_titles(mut self, include_titles: bool) -> Self {
        self.include_titles = include_titles;
        self
    }

    fn reference(&self, name: &str) -> Json {
        json!({ "$ref": format!("#/{}/{}", self.definitions_key, name) })
    }
}

/// A schema fragment and the definitions it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    schema: Json,
    definitions: IndexMap<String, Json>,
    optional: bool,
}

impl JsonSchema {
    pub fn new(schema: Json) -> Self {
        Self {
            schema,
            definitions: IndexMap::new(),
            optional: false,
        }
    }

    pub fn schema(&self) -> &Json {
        &self.schema
    }

    pub fn definitions(&self) -> &IndexMap<String, Json> {
        &self.definitions
    }

    /// Returns true if a field of this schema may be left out of an object.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Self-contained document: the root schema with `$schema` and every
    /// collected definition.
    pub fn export(&self, config: &JsonSchemaConfig) -> Json {
        let mut root = match self.referenced_definition(config) {
            Some(definition) => definition.clone(),
            None => self.schema.clone(),
        };
        if let Json::Object(map) = &mut root {
            map.insert("$schema".to_string(), Json::String(config.draft.clone()));
            if !self.definitions.is_empty() {
                let definitions: Map<String, Json> = self
                    .definitions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                map.insert(config.definitions_key.clone(), Json::Object(definitions));
            }
        }
        root
    }

    /// The definition a bare root `$ref` points to. Siblings of `$ref` are
    /// ignored by draft-07 readers, so such a root is inlined on export.
    fn referenced_definition(&self, config: &JsonSchemaConfig) -> Option<&Json> {
        let target = self.schema.as_object()?.get("$ref")?.as_str()?;
        let prefix = format!("#/{}/", config.definitions_key);
        self.definitions.get(target.strip_prefix(&prefix)?)
    }

    fn with_definitions(
        mut self,
        children: &[&JsonSchema],
        meta: &NodeMeta<'_>,
    ) -> SummonResult<Self> {
        for child in children {
            merge(&mut self.definitions, &child.definitions, meta)?;
        }
        Ok(self)
    }

    fn define(
        mut self,
        name: &str,
        config: &JsonSchemaConfig,
        meta: &NodeMeta<'_>,
    ) -> SummonResult<Self> {
        let mut body = std::mem::replace(&mut self.schema, config.reference(name));
        if config.include_titles {
            if let Json::Object(map) = &mut body {
                map.insert("title".to_string(), Json::String(name.to_string()));
            }
        }
        let single = IndexMap::from([(name.to_string(), body)]);
        merge(&mut self.definitions, &single, meta)?;
        Ok(self)
    }

    fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

fn merge(
    into: &mut IndexMap<String, Json>,
    from: &IndexMap<String, Json>,
    meta: &NodeMeta<'_>,
) -> SummonResult<()> {
    for (name, schema) in from {
        match into.get(name) {
            Some(existing) if existing != schema => {
                return Err(SummonError::derivation(
                    JsonSchemaInterpreter::KIND,
                    meta.label(),
                    format!("conflicting definitions for '{}'", name),
                ));
            }
            Some(_) => {}
            None => {
                into.insert(name.clone(), schema.clone());
            }
        }
    }
    Ok(())
}

fn tagged(tag: &str, field: &str, schema: Option<&Json>) -> Json {
    let mut properties = Map::new();
    properties.insert("_tag".to_string(), json!({ "type": "string", "enum": [tag] }));
    let mut required = vec![Json::String("_tag".to_string())];
    if let Some(schema) = schema {
        properties.insert(field.to_string(), schema.clone());
        required.push(Json::String(field.to_string()));
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Interpreter deriving [`JsonSchema`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaInterpreter;

impl Interpreter for JsonSchemaInterpreter {
    type Repr = JsonSchema;
    const KIND: &'static str = "JsonSchema";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(JsonSchema::new(match kind {
            PrimitiveKind::String => json!({ "type": "string" }),
            PrimitiveKind::Number => json!({ "type": "number" }),
            PrimitiveKind::Boolean => json!({ "type": "boolean" }),
            PrimitiveKind::Date => json!({ "type": "string", "format": "date-time" }),
            PrimitiveKind::BigInt => json!({ "type": "string", "pattern": "^-?[0-9]+$" }),
            PrimitiveKind::Uuid => json!({ "type": "string", "format": "uuid" }),
            PrimitiveKind::Unknown => json!({}),
        }))
    }

    fn string_literal(
        &self,
        value: &str,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(JsonSchema::new(json!({ "type": "string", "enum": [value] })))
    }

    fn keys_of(
        &self,
        keys: &[String],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(JsonSchema::new(json!({ "type": "string", "enum": keys })))
    }

    /// Same fragment as the inner schema, but left out of `required`.
    fn nullable(
        &self,
        inner: &JsonSchema,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(inner.clone().optional())
    }

    fn array(
        &self,
        element: &JsonSchema,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        JsonSchema::new(json!({ "type": "array", "items": element.schema }))
            .with_definitions(&[element], meta)
    }

    fn set(
        &self,
        element: &JsonSchema,
        _: &Comparator,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        JsonSchema::new(json!({ "type": "array", "items": element.schema, "uniqueItems": true }))
            .with_definitions(&[element], meta)
    }

    fn record(
        &self,
        key: &JsonSchema,
        value: &JsonSchema,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        JsonSchema::new(json!({
            "type": "object",
            "propertyNames": key.schema,
            "additionalProperties": value.schema,
        }))
        .with_definitions(&[key, value], meta)
    }

    fn newtype(
        &self,
        name: &str,
        underlying: &JsonSchema,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<JsonSchema> {
        let mut out = underlying.clone();
        if env.get_or_default::<JsonSchemaConfig>().include_titles {
            if let Json::Object(map) = &mut out.schema {
                map.insert("title".to_string(), Json::String(name.to_string()));
            }
        }
        Ok(out)
    }

    /// Named objects become definitions referenced by `$ref`.
    fn object(
        &self,
        mode: ObjectMode,
        required: &IndexMap<String, JsonSchema>,
        optional: &IndexMap<String, JsonSchema>,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<JsonSchema> {
        let mut properties = Map::new();
        let mut required_names = Vec::new();
        for (name, field) in required {
            properties.insert(name.clone(), field.schema.clone());
            if !field.is_optional() && mode != ObjectMode::Partial {
                required_names.push(Json::String(name.clone()));
            }
        }
        for (name, field) in optional {
            properties.insert(name.clone(), field.schema.clone());
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Json::Object(properties));
        if !required_names.is_empty() {
            schema.insert("required".to_string(), Json::Array(required_names));
        }

        let children: Vec<&JsonSchema> = required.values().chain(optional.values()).collect();
        let out = JsonSchema::new(Json::Object(schema)).with_definitions(&children, meta)?;
        match meta.name {
            Some(name) => out.define(name, &env.get_or_default::<JsonSchemaConfig>(), meta),
            None => Ok(out),
        }
    }

    fn tagged_union(
        &self,
        _: &str,
        variants: &IndexMap<String, JsonSchema>,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        let schemas: Vec<Json> = variants.values().map(|v| v.schema.clone()).collect();
        let children: Vec<&JsonSchema> = variants.values().collect();
        JsonSchema::new(json!({ "oneOf": schemas })).with_definitions(&children, meta)
    }

    fn union(
        &self,
        members: &[JsonSchema],
        _: &[Discriminator],
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        let schemas: Vec<Json> = members.iter().map(|m| m.schema.clone()).collect();
        let children: Vec<&JsonSchema> = members.iter().collect();
        JsonSchema::new(json!({ "anyOf": schemas })).with_definitions(&children, meta)
    }

    fn intersection(
        &self,
        members: &[JsonSchema],
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        let schemas: Vec<Json> = members.iter().map(|m| m.schema.clone()).collect();
        let children: Vec<&JsonSchema> = members.iter().collect();
        JsonSchema::new(json!({ "allOf": schemas })).with_definitions(&children, meta)
    }

    fn refined(
        &self,
        base: &JsonSchema,
        _: &Refinement,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(base.clone())
    }

    fn recursive(
        &self,
        name: &str,
        body: &JsonSchema,
        meta: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<JsonSchema> {
        let config = env.get_or_default::<JsonSchemaConfig>();
        // A named object body already defined itself under the same name.
        if body.schema == config.reference(name) {
            return Ok(body.clone());
        }
        body.clone().define(name, &config, meta)
    }

    fn self_reference(
        &self,
        name: &str,
        _: Deferred<JsonSchema>,
        _: &NodeMeta<'_>,
        env: &Environment,
    ) -> SummonResult<JsonSchema> {
        Ok(JsonSchema::new(
            env.get_or_default::<JsonSchemaConfig>().reference(name),
        ))
    }

    fn either(
        &self,
        left: &JsonSchema,
        right: &JsonSchema,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        JsonSchema::new(json!({
            "oneOf": [
                tagged("Left", "left", Some(&left.schema)),
                tagged("Right", "right", Some(&right.schema)),
            ]
        }))
        .with_definitions(&[left, right], meta)
    }

    fn option(
        &self,
        inner: &JsonSchema,
        meta: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<JsonSchema> {
        JsonSchema::new(json!({
            "oneOf": [
                tagged("None", "value", None),
                tagged("Some", "value", Some(&inner.schema)),
            ]
        }))
        .with_definitions(&[inner], meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphic::{summon, Schema};

    fn json_of(schema: &Schema) -> JsonSchema {
        summon(&JsonSchemaInterpreter, schema, &Environment::new()).unwrap()
    }

    #[test]
    fn test_optional_fields_are_not_required() {
        let schema = Schema::both(
            [("id", Schema::uuid()), ("nick", Schema::nullable(Schema::string()))],
            [("age", Schema::number())],
        );
        let out = json_of(&schema);
        assert_eq!(out.schema()["required"], json!(["id"]));
        assert_eq!(out.schema()["properties"]["age"], json!({ "type": "number" }));
    }

    #[test]
    fn test_named_object_becomes_definition() {
        let schema = Schema::array(Schema::interface([("a", Schema::string())]).named("Foo"));
        let out = json_of(&schema);
        assert_eq!(out.schema()["items"], json!({ "$ref": "#/definitions/Foo" }));
        assert!(out.definitions().contains_key("Foo"));
    }

    #[test]
    fn test_conflicting_definitions_fail() {
        let schema = Schema::interface([
            ("x", Schema::interface([("a", Schema::string())]).named("Foo")),
            ("y", Schema::interface([("b", Schema::string())]).named("Foo")),
        ]);
        let err = summon(&JsonSchemaInterpreter, &schema, &Environment::new()).unwrap_err();
        assert!(matches!(err, SummonError::Derivation { kind: "JsonSchema", .. }));
    }

    #[test]
    fn test_export_inlines_root_reference() {
        let schema = Schema::interface([("a", Schema::string())]).named("Foo");
        let doc = json_of(&schema).export(&JsonSchemaConfig::default());
        assert_eq!(doc["type"], json!("object"));
        assert_eq!(doc["$schema"], json!(DRAFT_07));
        assert!(doc["definitions"]["Foo"].is_object());
    }
}
