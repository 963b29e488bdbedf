//! Every interpreter at once.
//!
//! A [`Morph`] keeps the schema it was summoned from, so it can be used as a
//! building block of larger schemas and summoned again there.

use morphic::{Environment, Schema, SummonConfig, SummonResult, Summoner};
use tracing::debug;

use crate::arbitrary::{Arbitrary, ArbitraryInterpreter};
use crate::eq::{Eq, EqInterpreter};
use crate::guard::{Guard, GuardInterpreter};
use crate::json_schema::{JsonSchema, JsonSchemaInterpreter};
use crate::show::{Show, ShowInterpreter};

/// A schema together with all of its derived representations.
#[derive(Debug, Clone)]
pub struct Morph {
    schema: Schema,
    pub eq: Eq,
    pub show: Show,
    pub arbitrary: Arbitrary,
    pub json_schema: JsonSchema,
    pub guard: Guard,
}

impl Morph {
    /// Summon every representation of `schema`.
    ///
    /// The [`SummonConfig`] in `env`, if any, bounds each fold. The first
    /// failing interpreter aborts the whole bundle.
    pub fn summon(schema: &Schema, env: &Environment) -> SummonResult<Self> {
        let summoner = Summoner::new(env).with_config(env.get_or_default::<SummonConfig>());
        let morph = Self {
            schema: schema.clone(),
            eq: summoner.summon(&EqInterpreter, schema)?,
            show: summoner.summon(&ShowInterpreter, schema)?,
            arbitrary: summoner.summon(&ArbitraryInterpreter, schema)?,
            json_schema: summoner.summon(&JsonSchemaInterpreter, schema)?,
            guard: summoner.summon(&GuardInterpreter, schema)?,
        };
        debug!(root = %schema.label(), "summoned morph");
        Ok(morph)
    }

    /// [`Morph::summon`] in an empty environment.
    pub fn build(schema: &Schema) -> SummonResult<Self> {
        Self::summon(schema, &Environment::new())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl From<Morph> for Schema {
    fn from(morph: Morph) -> Self {
        morph.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphic::Value;

    #[test]
    fn test_morph_is_reusable_as_schema() {
        let a = Morph::build(&Schema::interface([("a", Schema::string())]).named("A")).unwrap();
        let list = Morph::build(&Schema::array(a.schema().clone())).unwrap();

        let v = Value::Array(vec![Value::object([("a", Value::string("x"))])]);
        assert!(list.guard.is(&v));
        assert!(list.eq.equals(&v, &v.clone()));
        assert_eq!(list.show.show(&v), r#"[{ a: "x" }]"#);
        assert!(list.json_schema.definitions().contains_key("A"));
    }

    #[test]
    fn test_morph_fails_as_a_whole() {
        let unguarded = Schema::recursive("Loop", |this| this);
        assert!(Morph::build(&unguarded).is_err());
    }
}
