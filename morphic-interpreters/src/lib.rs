//! # morphic-interpreters
//!
//! Concrete interpreters for [`morphic`] schemas:
//!
//! | Interpreter | Representation | Use |
//! |-------------|----------------|-----|
//! | [`EqInterpreter`] | [`Eq`] | cycle-aware equality |
//! | [`ShowInterpreter`] | [`Show`] | human-readable rendering |
//! | [`ArbitraryInterpreter`] | [`Arbitrary`] | random values, proptest strategies |
//! | [`JsonSchemaInterpreter`] | [`JsonSchema`] | JSON Schema export |
//! | [`GuardInterpreter`] | [`Guard`] | structural type checks |
//!
//! [`Morph`] summons all of them for one schema.
//!
//! ## Example
//!
//! ```rust
//! use morphic::{Schema, Value};
//! use morphic_interpreters::Morph;
//!
//! let person = Schema::interface([("name", Schema::string()), ("age", Schema::number())]);
//! let morph = Morph::build(&person).unwrap();
//!
//! let alice = Value::object([("name", Value::string("alice")), ("age", Value::Number(30.0))]);
//! assert!(morph.guard.is(&alice));
//! assert_eq!(morph.show.show(&alice), r#"{ name: "alice", age: 30 }"#);
//! ```

pub mod arbitrary;
pub mod eq;
pub mod guard;
pub mod json_schema;
pub mod morph;
pub mod show;

pub use arbitrary::{
    bounded_array, Arbitrary, ArbitraryConfig, ArbitraryError, ArbitraryInterpreter,
    ArbitraryResult, Bounds, Gen, Samples,
};
pub use eq::{Eq, EqInterpreter, Pending};
pub use guard::{Guard, GuardInterpreter};
pub use json_schema::{JsonSchema, JsonSchemaConfig, JsonSchemaInterpreter, DRAFT_07};
pub use morph::Morph;
pub use show::{Output, Show, ShowInterpreter};
