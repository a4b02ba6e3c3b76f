//! Function and method registry.
//!
//! Calls are resolved by case-insensitive name. Binding checks names and
//! argument counts before a command runs; at evaluation time an unresolvable
//! call simply yields `Null`.

use std::ops::RangeInclusive;
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;
use time::OffsetDateTime;

use crate::query::compare::equals;
use crate::query::eval::EvalContext;
use crate::query::expr::{Expr, ExprKind};
use crate::query::temporal::{format_date, parse_date};
use crate::query::value::Value;

/// A callable `name(args)`.
pub trait SqlFunction: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;
    /// Accepted argument counts.
    fn arity(&self) -> RangeInclusive<usize>;
    /// Whether the function folds a whole group into one value.
    fn is_aggregation(&self) -> bool {
        false
    }
    /// Evaluates the call for one candidate. Arguments arrive unevaluated.
    fn call(&self, ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Value;
}

/// A callable `receiver.name(args)`.
pub trait SqlMethod: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;
    /// Accepted argument counts.
    fn arity(&self) -> RangeInclusive<usize>;
    /// Evaluates the call. Arguments arrive unevaluated.
    fn call(
        &self,
        ctx: &EvalContext<'_>,
        candidate: &Value,
        receiver: &Value,
        args: &[Expr],
    ) -> Value;
}

/// Name-keyed functions and methods.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, Arc<dyn SqlFunction>>,
    methods: FxHashMap<String, Arc<dyn SqlMethod>>,
}

impl FunctionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin functions and methods.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_function(IfNull);
        registry.register_function(Coalesce);
        registry.register_function(DateFn);
        registry.register_method(FormatMethod);
        registry.register_method(ContainsValue);
        registry.register_method(CharAt);
        registry.register_method(Append);
        for (name, op) in UNARY_METHODS {
            registry.register_method(Unary { name: *name, op: *op });
        }
        registry
    }

    /// Shared builtin registry.
    pub fn builtin() -> &'static FunctionRegistry {
        static BUILTIN: OnceLock<FunctionRegistry> = OnceLock::new();
        BUILTIN.get_or_init(FunctionRegistry::with_builtins)
    }

    /// Adds or replaces a function.
    pub fn register_function(&mut self, function: impl SqlFunction + 'static) {
        self.functions
            .insert(function.name().to_ascii_lowercase(), Arc::new(function));
    }

    /// Adds or replaces a method.
    pub fn register_method(&mut self, method: impl SqlMethod + 'static) {
        self.methods
            .insert(method.name().to_ascii_lowercase(), Arc::new(method));
    }

    /// Looks up a function.
    pub fn function(&self, name: &str) -> Option<&dyn SqlFunction> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|f| f.as_ref())
    }

    /// Looks up a method.
    pub fn method(&self, name: &str) -> Option<&dyn SqlMethod> {
        self.methods.get(&name.to_ascii_lowercase()).map(|m| m.as_ref())
    }
}

fn eval_args(ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Vec<Value> {
    args.iter().map(|arg| arg.evaluate(ctx, candidate)).collect()
}

/// `ifnull(value, fallback[, replacement])`
struct IfNull;

impl SqlFunction for IfNull {
    fn name(&self) -> &str {
        "ifnull"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        2..=3
    }

    fn call(&self, ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Value {
        let Some(first) = args.first() else {
            return Value::Null;
        };
        let value = first.evaluate(ctx, candidate);
        if value.is_null() {
            return args
                .get(1)
                .map_or(Value::Null, |fallback| fallback.evaluate(ctx, candidate));
        }
        match args.get(2) {
            Some(replacement) => replacement.evaluate(ctx, candidate),
            None => value,
        }
    }
}

/// `coalesce(a, b, ...)`: first non-null argument.
struct Coalesce;

impl SqlFunction for Coalesce {
    fn name(&self) -> &str {
        "coalesce"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=usize::MAX
    }

    fn call(&self, ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Value {
        args.iter()
            .map(|arg| arg.evaluate(ctx, candidate))
            .find(|value| !value.is_null())
            .unwrap_or(Value::Null)
    }
}

/// `date()` is the current instant; `date(text)` parses, `date(millis)` wraps.
struct DateFn;

impl SqlFunction for DateFn {
    fn name(&self) -> &str {
        "date"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        0..=1
    }

    fn call(&self, ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Value {
        match eval_args(ctx, candidate, args).first() {
            None => {
                let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
                Value::Date(now as i64)
            }
            Some(Value::String(text)) => parse_date(text).map_or(Value::Null, Value::Date),
            Some(Value::Date(ms)) => Value::Date(*ms),
            Some(other) => other.as_i64().map_or(Value::Null, Value::Date),
        }
    }
}

/// `format(pattern)`: dates take `yyyy MM dd HH mm ss` tokens, other values
/// replace `%s`/`%d` placeholders.
struct FormatMethod;

impl SqlMethod for FormatMethod {
    fn name(&self) -> &str {
        "format"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn call(
        &self,
        ctx: &EvalContext<'_>,
        candidate: &Value,
        receiver: &Value,
        args: &[Expr],
    ) -> Value {
        let pattern = match eval_args(ctx, candidate, args).into_iter().next() {
            Some(Value::String(pattern)) => pattern,
            _ => return Value::Null,
        };
        match receiver {
            Value::Null => Value::Null,
            Value::Date(ms) => Value::String(format_date_pattern(*ms, &pattern)),
            other => {
                let text = other.to_string();
                Value::String(pattern.replace("%s", &text).replace("%d", &text))
            }
        }
    }
}

fn format_date_pattern(millis: i64, pattern: &str) -> String {
    let formatted = format_date(millis);
    let (date, clock) = formatted
        .split_once(' ')
        .unwrap_or((formatted.as_str(), "00:00:00"));
    let mut date_parts = date.rsplitn(3, '-');
    let day = date_parts.next().unwrap_or("");
    let month = date_parts.next().unwrap_or("");
    let year = date_parts.next().unwrap_or("");
    let mut clock_parts = clock.splitn(3, ':');
    let hour = clock_parts.next().unwrap_or("");
    let minute = clock_parts.next().unwrap_or("");
    let second = clock_parts.next().unwrap_or("");
    pattern
        .replace("yyyy", year)
        .replace("MM", month)
        .replace("dd", day)
        .replace("HH", hour)
        .replace("mm", minute)
        .replace("ss", second)
}

/// `containsValue(x)`: a literal argument is looked up among the map's values;
/// any other argument is evaluated as a predicate against each value.
struct ContainsValue;

impl SqlMethod for ContainsValue {
    fn name(&self) -> &str {
        "containsValue"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn call(
        &self,
        ctx: &EvalContext<'_>,
        _candidate: &Value,
        receiver: &Value,
        args: &[Expr],
    ) -> Value {
        let values: Vec<&Value> = match receiver {
            Value::Map(entries) => entries.iter().map(|(_, v)| v).collect(),
            Value::Document(doc) => doc.values().collect(),
            _ => return Value::Bool(false),
        };
        let Some(arg) = args.first() else {
            return Value::Bool(false);
        };
        let found = match &arg.kind {
            ExprKind::Literal(needle) => values.iter().any(|value| equals(value, needle)),
            _ => values.iter().any(|value| arg.matches(ctx, value)),
        };
        Value::Bool(found)
    }
}

/// `charAt(i)`
struct CharAt;

impl SqlMethod for CharAt {
    fn name(&self) -> &str {
        "charAt"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn call(
        &self,
        ctx: &EvalContext<'_>,
        candidate: &Value,
        receiver: &Value,
        args: &[Expr],
    ) -> Value {
        let index = eval_args(ctx, candidate, args)
            .first()
            .and_then(Value::as_i64)
            .and_then(|i| usize::try_from(i).ok());
        match (receiver, index) {
            (Value::String(text), Some(index)) => text
                .chars()
                .nth(index)
                .map_or(Value::Null, |ch| Value::String(ch.to_string())),
            _ => Value::Null,
        }
    }
}

/// `append(a, ...)`: string concatenation of the receiver and every argument.
struct Append;

impl SqlMethod for Append {
    fn name(&self) -> &str {
        "append"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=usize::MAX
    }

    fn call(
        &self,
        ctx: &EvalContext<'_>,
        candidate: &Value,
        receiver: &Value,
        args: &[Expr],
    ) -> Value {
        if receiver.is_null() {
            return Value::Null;
        }
        let mut out = receiver.to_string();
        for arg in eval_args(ctx, candidate, args) {
            if !arg.is_null() {
                out.push_str(&arg.to_string());
            }
        }
        Value::String(out)
    }
}

type UnaryOp = fn(&Value) -> Value;

const UNARY_METHODS: &[(&str, UnaryOp)] = &[
    ("asInteger", as_integer),
    ("asString", as_string),
    ("size", size),
    ("length", length),
    ("toUpperCase", to_upper),
    ("toLowerCase", to_lower),
    ("keys", keys),
    ("values", values),
];

/// Argument-free method backed by a plain function.
struct Unary {
    name: &'static str,
    op: UnaryOp,
}

impl SqlMethod for Unary {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> RangeInclusive<usize> {
        0..=0
    }

    fn call(
        &self,
        _ctx: &EvalContext<'_>,
        _candidate: &Value,
        receiver: &Value,
        _args: &[Expr],
    ) -> Value {
        (self.op)(receiver)
    }
}

fn as_integer(value: &Value) -> Value {
    match value {
        Value::Int(v) => Value::Int(*v),
        Value::String(text) => text.trim().parse::<i32>().map_or(Value::Null, Value::Int),
        other => other
            .as_f64()
            .filter(|v| v.is_finite() && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX))
            .map_or(Value::Null, |v| Value::Int(v.trunc() as i32)),
    }
}

fn as_string(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

fn size(value: &Value) -> Value {
    Value::Int(value.size() as i32)
}

fn length(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::Int(text.chars().count() as i32),
        Value::Null => Value::Null,
        other => Value::Int(other.to_string().chars().count() as i32),
    }
}

fn to_upper(value: &Value) -> Value {
    value
        .as_str()
        .map_or(Value::Null, |text| Value::String(text.to_uppercase()))
}

fn to_lower(value: &Value) -> Value {
    value
        .as_str()
        .map_or(Value::Null, |text| Value::String(text.to_lowercase()))
}

fn keys(value: &Value) -> Value {
    match value {
        Value::Map(entries) => Value::List(entries.iter().map(|(k, _)| k.clone()).collect()),
        Value::Document(doc) => Value::List(
            doc.fields
                .iter()
                .map(|(name, _)| Value::String(name.clone()))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn values(value: &Value) -> Value {
    match value {
        Value::Map(entries) => Value::List(entries.iter().map(|(_, v)| v.clone()).collect()),
        Value::Document(doc) => Value::List(doc.values().cloned().collect()),
        _ => Value::Null,
    }
}
