//! Per-record evaluation.
//!
//! [`Expr::evaluate`] is total: type mismatches yield `false` or `Null`, never an
//! error. When the context carries a [`SearchPlan`], nodes the search pass
//! resolved through an index answer from set membership before any child is
//! evaluated.

use std::borrow::Cow;

use rustc_hash::FxHashMap;

use crate::query::compare::{compare, equals, like, like_pattern};
use crate::query::expr::{ArithOp, CompareOp, Expr, ExprKind, Reflect};
use crate::query::functions::FunctionRegistry;
use crate::query::profile::{record_profile_count, QueryProfileKind};
use crate::query::search::SearchPlan;
use crate::query::store::RecordStore;
use crate::query::value::{Document, Value};

/// Everything evaluation may consult besides the candidate itself.
pub struct EvalContext<'a> {
    variables: FxHashMap<String, Value>,
    functions: &'a FunctionRegistry,
    plan: Option<&'a SearchPlan<'a>>,
    store: Option<&'a dyn RecordStore>,
}

impl Default for EvalContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> EvalContext<'a> {
    /// Context with the builtin functions and nothing else.
    pub fn new() -> Self {
        Self {
            variables: FxHashMap::default(),
            functions: FunctionRegistry::builtin(),
            plan: None,
            store: None,
        }
    }

    /// Replaces the function registry.
    pub fn with_functions(mut self, functions: &'a FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Attaches the search pass output for the tree being evaluated.
    pub fn with_plan(mut self, plan: &'a SearchPlan<'a>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Attaches a store used to follow links and resolve class hierarchy.
    pub fn with_store(mut self, store: &'a dyn RecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets a context variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_variable(name, value);
        self
    }

    /// Sets a context variable in place.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Looks up a context variable; a leading `$` is ignored.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix('$').unwrap_or(name);
        self.variables.get(name)
    }

    /// Registry used for calls.
    pub fn functions(&self) -> &FunctionRegistry {
        self.functions
    }

    /// Record store, if any.
    pub fn store(&self) -> Option<&dyn RecordStore> {
        self.store
    }

    /// Follows a link to its document; documents are returned as they are.
    pub fn resolve<'v>(&self, value: &'v Value) -> Option<Cow<'v, Document>> {
        match value {
            Value::Document(doc) => Some(Cow::Borrowed(doc.as_ref())),
            Value::Link(id) => self.store?.load(id).map(Cow::Owned),
            _ => None,
        }
    }

    fn plan_verdict(&self, node: &Expr, candidate: &Value) -> Option<bool> {
        let result = self.plan?.result(node)?;
        let verdict = result.verdict(candidate.record_id());
        match verdict {
            Some(true) => record_profile_count(QueryProfileKind::ShortcutTrue, 1),
            Some(false) => record_profile_count(QueryProfileKind::ShortcutFalse, 1),
            None => {}
        }
        verdict
    }
}

impl Expr {
    /// Evaluates the node against `candidate`.
    pub fn evaluate(&self, ctx: &EvalContext<'_>, candidate: &Value) -> Value {
        if let Some(verdict) = ctx.plan_verdict(self, candidate) {
            return Value::Bool(verdict);
        }
        self.evaluate_direct(ctx, candidate)
    }

    /// Convenience for predicates: whether evaluation yields `true`.
    pub fn matches(&self, ctx: &EvalContext<'_>, candidate: &Value) -> bool {
        self.evaluate(ctx, candidate).is_true()
    }

    fn evaluate_direct(&self, ctx: &EvalContext<'_>, candidate: &Value) -> Value {
        match &self.kind {
            ExprKind::Literal(value) => value.clone(),
            ExprKind::Field(name) => field_value(ctx, candidate, name),
            ExprKind::ContextVar(name) => ctx.variable(name).cloned().unwrap_or(Value::Null),
            ExprKind::Parameter(_) => Value::Null,
            ExprKind::Path(left, right) => {
                let base = left.evaluate(ctx, candidate);
                right.evaluate(ctx, &base)
            }
            ExprKind::Collection(items) => {
                Value::List(items.iter().map(|item| item.evaluate(ctx, candidate)).collect())
            }
            ExprKind::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.evaluate(ctx, candidate), v.evaluate(ctx, candidate)))
                    .collect(),
            ),
            ExprKind::And(children) => {
                Value::Bool(children.iter().all(|child| child.matches(ctx, candidate)))
            }
            ExprKind::Or(children) => {
                Value::Bool(children.iter().any(|child| child.matches(ctx, candidate)))
            }
            ExprKind::Not(inner) => Value::Bool(!inner.matches(ctx, candidate)),
            ExprKind::Compare { op, left, right } => {
                let l = left.evaluate(ctx, candidate);
                let r = right.evaluate(ctx, candidate);
                Value::Bool(apply_compare(*op, &l, &r))
            }
            ExprKind::Like(left, pattern) => {
                let pattern = pattern.evaluate(ctx, candidate);
                Value::Bool(eval_like(ctx, left, &pattern, candidate))
            }
            ExprKind::InstanceOf(left, class) => {
                Value::Bool(eval_instance_of(ctx, left, class, candidate))
            }
            ExprKind::In(left, right) => {
                let needle = left.evaluate(ctx, candidate);
                let haystack = right.evaluate(ctx, candidate);
                Value::Bool(match &haystack {
                    Value::List(items) => items.iter().any(|item| equals(&needle, item)),
                    other => equals(&needle, other),
                })
            }
            ExprKind::Between { target, low, high } => {
                let value = target.evaluate(ctx, candidate);
                let low = low.evaluate(ctx, candidate);
                let high = high.evaluate(ctx, candidate);
                Value::Bool(
                    apply_compare(CompareOp::Ge, &value, &low)
                        && apply_compare(CompareOp::Le, &value, &high),
                )
            }
            ExprKind::IsNull(inner) => Value::Bool(inner.evaluate(ctx, candidate).is_null()),
            ExprKind::IsNotNull(inner) => Value::Bool(!inner.evaluate(ctx, candidate).is_null()),
            ExprKind::IsDefined(inner) => Value::Bool(match &inner.kind {
                ExprKind::Field(name) => match ctx.resolve(candidate) {
                    Some(doc) => doc.has_field(name),
                    None => candidate.map_get(name).is_some(),
                },
                _ => !inner.evaluate(ctx, candidate).is_null(),
            }),
            ExprKind::Arithmetic { op, left, right } => {
                let l = left.evaluate(ctx, candidate);
                let r = right.evaluate(ctx, candidate);
                arithmetic(*op, &l, &r)
            }
            ExprKind::Filtered { source, filters } => {
                let container = source.evaluate(ctx, candidate);
                eval_filtered(ctx, container, filters)
            }
            ExprKind::Function { name, args, .. } => match ctx.functions.function(name) {
                Some(function) => function.call(ctx, candidate, args),
                None => Value::Null,
            },
            ExprKind::Method { name, source, args } => match ctx.functions.method(name) {
                Some(method) => {
                    let receiver = source.evaluate(ctx, candidate);
                    method.call(ctx, candidate, &receiver, args)
                }
                None => Value::Null,
            },
            ExprKind::Reflect(which) => reflect(ctx, *which, candidate),
            ExprKind::Include => Value::Bool(true),
            ExprKind::Exclude => Value::Bool(false),
            ExprKind::Any | ExprKind::All => Value::List(candidate_values(ctx, candidate)),
        }
    }
}

/// Applies a comparison operator through the value comparator.
pub fn apply_compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        CompareOp::Eq => equals(left, right),
        CompareOp::Ne => !equals(left, right),
        CompareOp::Lt => compare(left, right) == Some(Less),
        CompareOp::Le => matches!(compare(left, right), Some(Less | Equal)),
        CompareOp::Gt => compare(left, right) == Some(Greater),
        CompareOp::Ge => matches!(compare(left, right), Some(Greater | Equal)),
    }
}

fn field_value(ctx: &EvalContext<'_>, value: &Value, name: &str) -> Value {
    match value {
        Value::Document(doc) => doc.field(name).cloned().unwrap_or(Value::Null),
        Value::Map(_) => value.map_get(name).cloned().unwrap_or(Value::Null),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| field_value(ctx, item, name))
                .collect(),
        ),
        Value::Link(_) => ctx
            .resolve(value)
            .and_then(|doc| doc.field(name).cloned())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Values `any()`/`all()` range over: document field values, map values, list
/// elements, or the candidate itself.
fn candidate_values(ctx: &EvalContext<'_>, candidate: &Value) -> Vec<Value> {
    match candidate {
        Value::List(items) => items.clone(),
        Value::Map(entries) => entries.iter().map(|(_, v)| v.clone()).collect(),
        Value::Null => Vec::new(),
        other => match ctx.resolve(other) {
            Some(doc) => doc.values().cloned().collect(),
            None => vec![other.clone()],
        },
    }
}

fn eval_like(ctx: &EvalContext<'_>, left: &Expr, pattern: &Value, candidate: &Value) -> bool {
    let Some(pattern) = like_pattern(pattern) else {
        return false;
    };
    match &left.kind {
        ExprKind::Any => candidate_values(ctx, candidate)
            .iter()
            .any(|value| value.as_str().is_some_and(|text| like(text, &pattern))),
        // Non-string elements do not take part in the universal match.
        ExprKind::All => candidate_values(ctx, candidate)
            .iter()
            .filter_map(Value::as_str)
            .all(|text| like(text, &pattern)),
        _ => left
            .evaluate(ctx, candidate)
            .as_str()
            .is_some_and(|text| like(text, &pattern)),
    }
}

fn eval_instance_of(ctx: &EvalContext<'_>, left: &Expr, class: &Expr, candidate: &Value) -> bool {
    let target = match &class.kind {
        ExprKind::Field(name) => Value::String(name.clone()),
        _ => class.evaluate(ctx, candidate),
    };
    let Some(target) = target.as_str() else {
        return false;
    };
    let subject = left.evaluate(ctx, candidate);
    let Some(doc) = ctx.resolve(&subject) else {
        return false;
    };
    let Some(actual) = doc.class.as_deref() else {
        return false;
    };
    actual.eq_ignore_ascii_case(target)
        || ctx
            .store
            .is_some_and(|store| store.is_subclass(actual, target))
}

/// Applies a bracket to `container`.
///
/// Literal brackets address positions and take precedence over filtering:
/// `[start, end]` with two integers is the half-open slice the range form of
/// the grammar produces, `[i]` is the element at `i`, and `['key']` is a map or
/// document entry. Any other bracket filters element by element (see
/// [`apply_filters`]).
fn eval_filtered(ctx: &EvalContext<'_>, container: Value, filters: &[Expr]) -> Value {
    let int_literal = |expr: &Expr| match &expr.kind {
        ExprKind::Literal(value) => value.as_i64(),
        _ => None,
    };
    match filters {
        [start, end] if int_literal(start).is_some() && int_literal(end).is_some() => {
            let (Some(start), Some(end)) = (int_literal(start), int_literal(end)) else {
                return Value::Null;
            };
            slice(container, start, end)
        }
        [single] => {
            if let Some(index) = int_literal(single) {
                return element_at(container, index);
            }
            if let ExprKind::Literal(Value::String(key)) = &single.kind {
                return match &container {
                    Value::Map(_) => container.map_get(key).cloned().unwrap_or(Value::Null),
                    other => field_value(ctx, other, key),
                };
            }
            keep_matching(ctx, container, filters)
        }
        _ => keep_matching(ctx, container, filters),
    }
}

fn slice(container: Value, start: i64, end: i64) -> Value {
    let Value::List(items) = container else {
        return Value::Null;
    };
    let len = items.len() as i64;
    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len) as usize;
    if start >= end {
        return Value::List(Vec::new());
    }
    Value::List(items[start..end].to_vec())
}

fn element_at(container: Value, index: i64) -> Value {
    let Ok(index) = usize::try_from(index) else {
        return Value::Null;
    };
    match container {
        Value::List(mut items) if index < items.len() => items.swap_remove(index),
        _ => Value::Null,
    }
}

fn keep_matching(ctx: &EvalContext<'_>, container: Value, filters: &[Expr]) -> Value {
    match container {
        Value::List(items) => {
            let mut kept: Vec<Value> = items
                .into_iter()
                .filter_map(|item| apply_filters(ctx, item, filters))
                .collect();
            if kept.len() == 1 {
                kept.swap_remove(0)
            } else {
                Value::List(kept)
            }
        }
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .filter_map(|(k, v)| apply_filters(ctx, v, filters).map(|v| (k, v)))
                .collect(),
        ),
        Value::Null => Value::Null,
        single => apply_filters(ctx, single, filters).unwrap_or(Value::Null),
    }
}

/// Runs the filters of one bracket against an element in order. A filter
/// that yields a boolean keeps or drops the element; any other non-null value
/// replaces it, so `docks[boat.name]` projects. A null result drops it.
fn apply_filters(ctx: &EvalContext<'_>, item: Value, filters: &[Expr]) -> Option<Value> {
    let mut current = item;
    for filter in filters {
        match filter.evaluate(ctx, &current) {
            Value::Bool(true) => {}
            Value::Bool(false) | Value::Null => return None,
            projected => current = projected,
        }
    }
    Some(current)
}

fn reflect(ctx: &EvalContext<'_>, which: Reflect, candidate: &Value) -> Value {
    if which == Reflect::This {
        return candidate.clone();
    }
    if which == Reflect::Id {
        return candidate.record_id().map_or(Value::Null, Value::Link);
    }
    let Some(doc) = ctx.resolve(candidate) else {
        return match (which, candidate) {
            (Reflect::Type, Value::Bytes(_)) => Value::from("bytes"),
            (Reflect::Raw, Value::Bytes(bytes)) => Value::Bytes(bytes.clone()),
            (Reflect::Size, Value::Bytes(bytes)) => Value::Int(bytes.len() as i32),
            _ => Value::Null,
        };
    };
    match which {
        Reflect::Class => doc.class.clone().map_or(Value::Null, Value::String),
        Reflect::Version => Value::Int(doc.version),
        Reflect::Type => Value::from("document"),
        Reflect::Size => doc
            .raw
            .as_ref()
            .map_or(Value::Null, |raw| Value::Int(raw.len() as i32)),
        Reflect::Raw => doc.raw.clone().map_or(Value::Null, Value::Bytes),
        Reflect::This | Reflect::Id => Value::Null,
    }
}

/// Numeric rank used for promotion: Int < Long < Float < Double.
fn numeric_rank(value: &Value) -> Option<u8> {
    match value {
        Value::Int(_) => Some(0),
        Value::Long(_) => Some(1),
        Value::Float(_) => Some(2),
        Value::Double(_) => Some(3),
        _ => None,
    }
}

/// Arithmetic with numeric promotion. Integer overflow promotes to `Double`;
/// integer division or modulo by zero gives `Null`.
pub fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Value {
    if op == ArithOp::Plus {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Value::String(format!("{a}{b}")),
            (Value::String(a), other) if !other.is_null() => {
                return Value::String(format!("{a}{other}"))
            }
            (other, Value::String(b)) if !other.is_null() => {
                return Value::String(format!("{other}{b}"))
            }
            _ => {}
        }
    }
    let (Some(lr), Some(rr)) = (numeric_rank(left), numeric_rank(right)) else {
        return Value::Null;
    };
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Value::Null;
    };
    if op == ArithOp::Power {
        return Value::Double(a.powf(b));
    }
    match lr.max(rr) {
        0 | 1 => {
            let (Some(x), Some(y)) = (left.as_i64(), right.as_i64()) else {
                return Value::Null;
            };
            let result = match op {
                ArithOp::Plus => x.checked_add(y),
                ArithOp::Minus => x.checked_sub(y),
                ArithOp::Multiply => x.checked_mul(y),
                ArithOp::Divide if y == 0 => return Value::Null,
                ArithOp::Divide => x.checked_div(y),
                ArithOp::Modulo if y == 0 => return Value::Null,
                ArithOp::Modulo => x.checked_rem(y),
                ArithOp::Power => None,
            };
            match result {
                Some(v) if lr.max(rr) == 0 => {
                    i32::try_from(v).map_or(Value::Long(v), Value::Int)
                }
                Some(v) => Value::Long(v),
                None => Value::Double(float_op(op, a, b)),
            }
        }
        2 => Value::Float(float_op(op, a, b) as f32),
        _ => Value::Double(float_op(op, a, b)),
    }
}

fn float_op(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Plus => a + b,
        ArithOp::Minus => a - b,
        ArithOp::Multiply => a * b,
        ArithOp::Divide => a / b,
        ArithOp::Modulo => a % b,
        ArithOp::Power => a.powf(b),
    }
}
