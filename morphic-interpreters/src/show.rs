//! Text rendering representation.
//!
//! Rendering rules:
//!
//! | Node | Rendering |
//! |------|-----------|
//! | string, literal, keys of, uuid | JSON-quoted, `"abc"` |
//! | number, boolean, bigint | `12`, `true` |
//! | date | ISO-8601 with milliseconds, `1970-01-01T00:00:12.345Z` |
//! | object | `{ a: "x", b: undefined }`, absent fields as `undefined` |
//! | record | `{ "a": 1 }`, `{}` when empty |
//! | array | `[1, 2]` |
//! | set | `new Set([1, 2])` |
//! | newtype | `<Name>("abc")` |
//! | nullable, option | `some("a")`, `none` |
//! | either | `left("a")`, `right(1)` |
//!
//! A value that appears inside itself renders as `<circular>` at the point
//! of re-entry.
//!
//! Renderers write into an [`Output`] and queue nested values there rather
//! than rendering them in place. [`Show::show`] expands the queue in a loop,
//! so deeply nested values do not deepen the call stack.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::SecondsFormat;
use indexmap::IndexMap;
use morphic::{
    Comparator, Deferred, Discriminator, Environment, Interpreter, NodeMeta, Object, ObjectMode,
    PrimitiveKind, Refinement, SummonResult, Value, Visited,
};

type ShowFn = dyn Fn(&Value, &mut Output) + Send + Sync;

/// Operation id used to mark objects being rendered.
const SHOW_OP: usize = usize::MAX - 1;

const CIRCULAR: &str = "<circular>";

enum Step {
    Text(Cow<'static, str>),
    Render(Show, Value),
    Plain(Value),
    Leave(usize),
}

/// Text and nested renders queued by one renderer call.
#[derive(Default)]
pub struct Output {
    queued: Vec<Step>,
    active: Visited,
}

impl Output {
    pub fn text(&mut self, text: impl Into<Cow<'static, str>>) {
        self.queued.push(Step::Text(text.into()));
    }

    /// Queues `value` rendered by `show`.
    pub fn render(&mut self, show: &Show, value: Value) {
        self.queued.push(Step::Render(show.clone(), value));
    }

    /// Queues `value` rendered without a schema.
    pub fn plain(&mut self, value: Value) {
        self.queued.push(Step::Plain(value));
    }

    /// Runs `body` with `object` marked as being rendered until everything
    /// `body` queues has been written. Writes `<circular>` instead when the
    /// object is reached again from inside itself.
    pub fn guarded(&mut self, object: &Object, body: impl FnOnce(&mut Self)) {
        let id = object.id();
        if !self.active.enter(SHOW_OP, id, id) {
            self.text(CIRCULAR);
            return;
        }
        body(self);
        self.queued.push(Step::Leave(id));
    }
}

/// A derived renderer.
#[derive(Clone)]
pub struct Show {
    render: Arc<ShowFn>,
    /// Field renderers when this renders an object, so intersections can
    /// render the union of their members' fields.
    fields: Option<Arc<IndexMap<String, Show>>>,
}

impl Show {
    /// Renderer from a plain function.
    pub fn new(f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        Self::new_in(move |value, out| out.text(f(value)))
    }

    /// Renderer that queues nested values on the output.
    pub fn new_in(f: impl Fn(&Value, &mut Output) + Send + Sync + 'static) -> Self {
        Self {
            render: Arc::new(f),
            fields: None,
        }
    }

    /// Renders every value as `text`.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| text.clone())
    }

    pub fn show(&self, value: &Value) -> String {
        let mut out = Output::default();
        let mut rendered = String::new();
        let mut stack = Vec::new();
        self.write(value, &mut out);
        loop {
            stack.extend(out.queued.drain(..).rev());
            let Some(step) = stack.pop() else {
                break;
            };
            match step {
                Step::Text(text) => rendered.push_str(&text),
                Step::Render(show, value) => show.write(&value, &mut out),
                Step::Plain(value) => render_value(&value, &mut out),
                Step::Leave(id) => out.active.leave(SHOW_OP, id, id),
            }
        }
        rendered
    }

    /// Renders in place. Only for wrappers that pick another renderer for
    /// the same value; nested values go through [`Output::render`].
    fn write(&self, value: &Value, out: &mut Output) {
        (self.render)(value, out)
    }

    /// Field renderers, if this renders an object.
    pub fn fields(&self) -> Option<&IndexMap<String, Show>> {
        self.fields.as_deref()
    }

    fn object(fields: IndexMap<String, Show>) -> Self {
        let fields = Arc::new(fields);
        let shown = Arc::clone(&fields);
        Self {
            render: Arc::new(move |value: &Value, out: &mut Output| {
                render_object(&shown, value, out)
            }),
            fields: Some(fields),
        }
    }
}

impl std::fmt::Debug for Show {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Show")
            .field("fields", &self.fields().map(|f| f.keys().collect::<Vec<_>>()))
            .finish()
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s))
}

/// Queues `{ a: .., b: .. }`, or `{}` when there are no entries. Absent
/// entries render as `undefined`.
fn render_entries<K: AsRef<str>, V>(
    entries: impl IntoIterator<Item = (K, Option<V>)>,
    out: &mut Output,
    mut each: impl FnMut(&mut Output, V),
) {
    let mut empty = true;
    for (name, value) in entries {
        out.text(if empty { "{ " } else { ", " });
        empty = false;
        out.text(format!("{}: ", name.as_ref()));
        match value {
            Some(value) => each(out, value),
            None => out.text("undefined"),
        }
    }
    out.text(if empty { "{}" } else { " }" });
}

fn render_object(fields: &IndexMap<String, Show>, value: &Value, out: &mut Output) {
    let Some(object) = value.as_object() else {
        return render_value(value, out);
    };
    out.guarded(object, |out| {
        let entries = fields
            .iter()
            .map(|(name, show)| (name, object.get(name).map(|field| (show, field))));
        render_entries(entries, out, |out, (show, field)| out.render(show, field));
    });
}

fn render_list(items: &[Value], out: &mut Output, mut each: impl FnMut(&mut Output, &Value)) {
    out.text("[");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.text(", ");
        }
        each(out, item);
    }
    out.text("]");
}

/// Schema-independent rendering, used for `unknown` and for values that do
/// not match their schema.
fn render_value(value: &Value, out: &mut Output) {
    match value {
        Value::Null => out.text("null"),
        Value::Bool(b) => out.text(b.to_string()),
        Value::Number(n) => out.text(n.to_string()),
        Value::BigInt(n) => out.text(n.to_string()),
        Value::String(s) => out.text(quote(s)),
        Value::Date(d) => out.text(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Uuid(u) => out.text(quote(&u.to_string())),
        Value::Array(items) => render_list(items, out, |out, item| out.plain(item.clone())),
        Value::Set(items) => {
            out.text("new Set(");
            render_list(items, out, |out, item| out.plain(item.clone()));
            out.text(")");
        }
        Value::Object(object) => out.guarded(object, |out| {
            let entries = object.snapshot().into_iter().map(|(k, v)| (k, Some(v)));
            render_entries(entries, out, Output::plain);
        }),
        Value::Option(None) => out.text("none"),
        Value::Option(Some(inner)) => wrap(out, "some(", |out| out.plain((**inner).clone())),
        Value::Left(inner) => wrap(out, "left(", |out| out.plain((**inner).clone())),
        Value::Right(inner) => wrap(out, "right(", |out| out.plain((**inner).clone())),
    }
}

/// Queues `open`, whatever `inner` queues, and a closing parenthesis.
fn wrap(out: &mut Output, open: impl Into<Cow<'static, str>>, inner: impl FnOnce(&mut Output)) {
    out.text(open);
    inner(out);
    out.text(")");
}

fn render_optional(inner: &Show, value: &Value, out: &mut Output) {
    match value {
        Value::Option(None) | Value::Null => out.text("none"),
        Value::Option(Some(x)) => wrap(out, "some(", |out| out.render(inner, (**x).clone())),
        other => wrap(out, "some(", |out| out.render(inner, other.clone())),
    }
}

/// Interpreter deriving [`Show`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowInterpreter;

impl Interpreter for ShowInterpreter {
    type Repr = Show;
    const KIND: &'static str = "Show";

    fn primitive(
        &self,
        kind: PrimitiveKind,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        Ok(match kind {
            PrimitiveKind::Date => Show::new_in(|value, out| match value {
                Value::Date(d) => out.text(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
                other => render_value(other, out),
            }),
            _ => Show::new_in(render_value),
        })
    }

    fn string_literal(&self, _: &str, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Show> {
        Ok(Show::new_in(render_value))
    }

    fn keys_of(&self, _: &[String], _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Show> {
        Ok(Show::new_in(render_value))
    }

    fn nullable(&self, inner: &Show, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Show> {
        let inner = inner.clone();
        Ok(Show::new_in(move |value, out| render_optional(&inner, value, out)))
    }

    fn array(&self, element: &Show, _: &NodeMeta<'_>, _: &Environment) -> SummonResult<Show> {
        let element = element.clone();
        Ok(Show::new_in(move |value, out| match value {
            Value::Array(items) | Value::Set(items) => {
                render_list(items, out, |out, item| out.render(&element, item.clone()))
            }
            other => render_value(other, out),
        }))
    }

    /// Elements are rendered in the set's declared order.
    fn set(
        &self,
        element: &Show,
        ordering: &Comparator,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let element = element.clone();
        let ordering = ordering.clone();
        Ok(Show::new_in(move |value, out| match value {
            Value::Array(items) | Value::Set(items) => {
                let mut items = items.clone();
                items.sort_by(|a, b| ordering.compare(a, b));
                wrap(out, "new Set(", |out| {
                    render_list(&items, out, |out, item| out.render(&element, item.clone()))
                });
            }
            other => render_value(other, out),
        }))
    }

    fn record(
        &self,
        _: &Show,
        value: &Show,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let value_show = value.clone();
        Ok(Show::new_in(move |value, out| {
            let Some(object) = value.as_object() else {
                return render_value(value, out);
            };
            out.guarded(object, |out| {
                let entries = object
                    .snapshot()
                    .into_iter()
                    .map(|(key, v)| (quote(&key), Some(v)));
                render_entries(entries, out, |out, v| out.render(&value_show, v));
            });
        }))
    }

    fn newtype(
        &self,
        name: &str,
        underlying: &Show,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let open = format!("<{}>(", name);
        let underlying = underlying.clone();
        Ok(Show::new_in(move |value, out| {
            wrap(out, open.clone(), |out| out.render(&underlying, value.clone()))
        }))
    }

    fn object(
        &self,
        _: ObjectMode,
        required: &IndexMap<String, Show>,
        optional: &IndexMap<String, Show>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let fields = required
            .iter()
            .chain(optional)
            .map(|(name, show)| (name.clone(), show.clone()))
            .collect();
        Ok(Show::object(fields))
    }

    fn tagged_union(
        &self,
        tag: &str,
        variants: &IndexMap<String, Show>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let tag = tag.to_string();
        let variants = variants.clone();
        Ok(Show::new_in(move |value, out| {
            let selected = value
                .field(&tag)
                .and_then(|t| t.as_str().and_then(|t| variants.get(t)).cloned());
            match selected {
                Some(show) => show.write(value, out),
                None => render_value(value, out),
            }
        }))
    }

    fn union(
        &self,
        members: &[Show],
        discriminators: &[Discriminator],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let members = members.to_vec();
        let discriminators = discriminators.to_vec();
        Ok(Show::new_in(move |value, out| {
            match discriminators
                .iter()
                .position(|d| d.matches(value))
                .and_then(|i| members.get(i))
            {
                Some(show) => show.write(value, out),
                None => render_value(value, out),
            }
        }))
    }

    /// Object members render as one object with the union of their fields.
    /// Anything else renders each member, joined by `&`.
    fn intersection(
        &self,
        members: &[Show],
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        if !members.is_empty() && members.iter().all(|m| m.fields().is_some()) {
            let mut fields = IndexMap::new();
            for member in members.iter().filter_map(Show::fields) {
                for (name, show) in member {
                    fields.entry(name.clone()).or_insert_with(|| show.clone());
                }
            }
            return Ok(Show::object(fields));
        }
        let members = members.to_vec();
        Ok(Show::new_in(move |value, out| {
            for (i, show) in members.iter().enumerate() {
                if i > 0 {
                    out.text(" & ");
                }
                out.render(show, value.clone());
            }
        }))
    }

    fn refined(
        &self,
        base: &Show,
        _: &Refinement,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        Ok(base.clone())
    }

    fn self_reference(
        &self,
        _: &str,
        deferred: Deferred<Show>,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        Ok(Show::new_in(move |value, out| match deferred.get() {
            Some(show) => show.write(value, out),
            None => render_value(value, out),
        }))
    }

    fn either(
        &self,
        left: &Show,
        right: &Show,
        _: &NodeMeta<'_>,
        _: &Environment,
    ) -> SummonResult<Show> {
        let (left, right) = (left.clone(), right.clone());
        Ok(Show::new_in(move |value, out| match value {
            Value::Left(x) => wrap(out, "left(", |out| out.render(&left, (**x).clone())),
            Value::Right(x) => wrap(out, "right(", |out| out.render(&right, (**x).clone())),
            other => render_value(other, out),
        }))
    }

    fn option(&self, inner: &Show, meta: &NodeMeta<'_>, env: &Environment) -> SummonResult<Show> {
        self.nullable(inner, meta, env)
    }
}
