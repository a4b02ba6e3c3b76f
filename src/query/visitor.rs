//! Tree traversals: visitors, rewriters and the standard preparation passes.
//!
//! Parsed trees are shared across executions, so every pass here is pure: it
//! reads the input tree and returns a new one.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::query::eval::EvalContext;
use crate::query::expr::{Expr, ExprKind, Param};
use crate::query::functions::FunctionRegistry;
use crate::query::value::Value;
use crate::types::{Result, SombraError};

/// Read-only traversal with caller-chosen per-node data.
pub trait ExprVisitor<D> {
    /// Result of visiting one node.
    type Output;

    /// Visits `node`; implementations decide whether and how to descend.
    fn visit(&mut self, node: &Expr, data: D) -> Self::Output;
}

/// Rebuilding traversal. The default rewrites children and keeps the node.
pub trait ExprRewriter {
    /// Returns the replacement for `node`.
    fn rewrite(&mut self, node: &Expr) -> Result<Expr> {
        self.rewrite_children(node)
    }

    /// Rebuilds `node` around rewritten children.
    fn rewrite_children(&mut self, node: &Expr) -> Result<Expr> {
        node.try_map_children(|child| self.rewrite(child))
    }
}

impl Expr {
    /// Dispatches to `visitor`.
    pub fn accept<D, V>(&self, visitor: &mut V, data: D) -> V::Output
    where
        V: ExprVisitor<D>,
    {
        visitor.visit(self, data)
    }

    /// Runs a rewriter over the tree.
    pub fn rewrite<R: ExprRewriter>(&self, rewriter: &mut R) -> Result<Expr> {
        rewriter.rewrite(self)
    }

    /// Deep structural copy. Every node is rebuilt; nothing is shared with
    /// `self`.
    pub fn copy(&self) -> Expr {
        self.map_children(Expr::copy)
    }

    /// Names of every field reference in the tree.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut collector = Collector::default();
        self.accept(&mut collector, ());
        collector.fields
    }

    /// Placeholders in order of appearance, duplicates included.
    pub fn parameters(&self) -> Vec<Param> {
        let mut collector = Collector::default();
        self.accept(&mut collector, ());
        collector.params
    }
}

#[derive(Default)]
struct Collector {
    fields: BTreeSet<String>,
    params: Vec<Param>,
}

impl ExprVisitor<()> for Collector {
    type Output = ();

    fn visit(&mut self, node: &Expr, _: ()) {
        match &node.kind {
            ExprKind::Field(name) => {
                self.fields.insert(name.clone());
            }
            ExprKind::Parameter(param) => self.params.push(param.clone()),
            _ => {}
        }
        for child in node.children() {
            child.accept(self, ());
        }
    }
}

/// Replaces placeholders with argument values.
#[derive(Clone, Debug, Default)]
pub struct ParameterResolver {
    positional: Vec<Value>,
    named: FxHashMap<String, Value>,
}

impl ParameterResolver {
    /// Resolver with no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver for positional arguments, `?0` first.
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            named: FxHashMap::default(),
        }
    }

    /// Adds a named argument.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    fn lookup(&self, param: &Param) -> Option<&Value> {
        match param {
            Param::Positional(index) => self.positional.get(*index),
            Param::Named(name) => self.named.get(name),
        }
    }
}

impl ExprRewriter for ParameterResolver {
    fn rewrite(&mut self, node: &Expr) -> Result<Expr> {
        let ExprKind::Parameter(param) = &node.kind else {
            return self.rewrite_children(node);
        };
        let value = self
            .lookup(param)
            .cloned()
            .ok_or_else(|| SombraError::UnboundParameter(param.to_string()))?;
        Ok(Expr {
            kind: ExprKind::Literal(value),
            alias: node.alias.clone(),
        })
    }
}

/// Checks call sites against a registry and marks aggregate calls.
pub struct Binder<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> Binder<'r> {
    /// Binder over `registry`.
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self { registry }
    }
}

impl ExprRewriter for Binder<'_> {
    fn rewrite(&mut self, node: &Expr) -> Result<Expr> {
        match &node.kind {
            ExprKind::Function { name, args, .. } => {
                let registry = self.registry;
                let Some(function) = registry.function(name) else {
                    debug!(name = %name, kind = "function", "expr.bind.unknown");
                    return Err(SombraError::UnknownFunction { name: name.clone() });
                };
                check_arity(name, function.arity(), args.len())?;
                let mut bound = self.rewrite_children(node)?;
                if let ExprKind::Function { aggregate, .. } = &mut bound.kind {
                    *aggregate = function.is_aggregation();
                }
                Ok(bound)
            }
            ExprKind::Method { name, args, .. } => {
                let registry = self.registry;
                let Some(method) = registry.method(name) else {
                    debug!(name = %name, kind = "method", "expr.bind.unknown");
                    return Err(SombraError::UnknownMethod { name: name.clone() });
                };
                check_arity(name, method.arity(), args.len())?;
                self.rewrite_children(node)
            }
            _ => self.rewrite_children(node),
        }
    }
}

fn check_arity(name: &str, arity: std::ops::RangeInclusive<usize>, actual: usize) -> Result<()> {
    if arity.contains(&actual) {
        return Ok(());
    }
    Err(SombraError::ArgumentCount {
        name: name.to_owned(),
        min: *arity.start(),
        max: *arity.end(),
        actual,
    })
}

/// Constant folding and boolean cleanup.
///
/// Static subtrees without function or method calls are evaluated once and
/// replaced by their value; predicates fold to `Include`/`Exclude` so the
/// search pass answers them without touching records.
#[derive(Debug, Default)]
pub struct Simplifier;

impl ExprRewriter for Simplifier {
    fn rewrite(&mut self, node: &Expr) -> Result<Expr> {
        let node = self.rewrite_children(node)?;
        Ok(simplify(node))
    }
}

impl Expr {
    /// Runs the [`Simplifier`].
    pub fn simplify(&self) -> Expr {
        simplify_tree(self)
    }
}

fn simplify_tree(node: &Expr) -> Expr {
    simplify(node.map_children(simplify_tree))
}

fn simplify(node: Expr) -> Expr {
    if let Some(folded) = fold(&node) {
        return folded;
    }
    let alias = node.alias;
    let simplified = match node.kind {
        ExprKind::And(children) => simplify_junction(children, true),
        ExprKind::Or(children) => simplify_junction(children, false),
        ExprKind::Not(inner) => {
            let Expr {
                kind,
                alias: inner_alias,
            } = *inner;
            match kind {
                ExprKind::Include => Expr::exclude(),
                ExprKind::Exclude => Expr::include(),
                ExprKind::Not(x) if is_predicate(&x) => *x,
                kind => Expr::not(Expr {
                    kind,
                    alias: inner_alias,
                }),
            }
        }
        kind => Expr { kind, alias: None },
    };
    match alias {
        Some(alias) => simplified.with_alias(alias),
        None => simplified,
    }
}

fn fold(node: &Expr) -> Option<Expr> {
    if matches!(
        node.kind,
        ExprKind::Literal(_) | ExprKind::Include | ExprKind::Exclude
    ) || !node.is_static()
        || contains_call(node)
    {
        return None;
    }
    let value = node.evaluate(&EvalContext::new(), &Value::Null);
    let folded = match (is_predicate(node), value) {
        (true, Value::Bool(true)) => Expr::include(),
        (true, Value::Bool(false)) => Expr::exclude(),
        (_, value) => Expr::literal(value),
    };
    Some(match &node.alias {
        Some(alias) => folded.with_alias(alias.clone()),
        None => folded,
    })
}

/// Calls resolve against the registry of the executing context and may
/// depend on the clock, so their value is not known here.
fn contains_call(node: &Expr) -> bool {
    matches!(
        node.kind,
        ExprKind::Function { .. } | ExprKind::Method { .. }
    ) || node.children().iter().any(|child| contains_call(child))
}

fn simplify_junction(children: Vec<Expr>, conjunction: bool) -> Expr {
    let (neutral, absorbing) = if conjunction {
        (Expr::include(), Expr::exclude())
    } else {
        (Expr::exclude(), Expr::include())
    };
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child.kind {
            ExprKind::And(nested) if conjunction && child.alias.is_none() => flat.extend(nested),
            ExprKind::Or(nested) if !conjunction && child.alias.is_none() => flat.extend(nested),
            kind => flat.push(Expr {
                kind,
                alias: child.alias,
            }),
        }
    }
    flat.retain(|child| child.kind != neutral.kind);
    if flat.iter().any(|child| child.kind == absorbing.kind) {
        return absorbing;
    }
    match flat.len() {
        0 => neutral,
        1 if is_predicate(&flat[0]) => flat.remove(0),
        _ if conjunction => Expr::and(flat),
        _ => Expr::or(flat),
    }
}

/// Nodes whose value is always a boolean.
fn is_predicate(node: &Expr) -> bool {
    matches!(
        node.kind,
        ExprKind::And(_)
            | ExprKind::Or(_)
            | ExprKind::Not(_)
            | ExprKind::Compare { .. }
            | ExprKind::Like(..)
            | ExprKind::InstanceOf(..)
            | ExprKind::In(..)
            | ExprKind::Between { .. }
            | ExprKind::IsNull(_)
            | ExprKind::IsNotNull(_)
            | ExprKind::IsDefined(_)
            | ExprKind::Include
            | ExprKind::Exclude
    )
}

/// Position of a node below its parent in a tree dump.
#[derive(Clone, Copy)]
enum Branch {
    Root,
    Middle,
    Last,
}

struct TreePrinter {
    lines: Vec<String>,
}

impl ExprVisitor<(&str, Branch)> for TreePrinter {
    type Output = ();

    fn visit(&mut self, node: &Expr, (prefix, branch): (&str, Branch)) {
        let (connector, extension) = match branch {
            Branch::Root => ("", ""),
            Branch::Middle => ("├─ ", "│  "),
            Branch::Last => ("└─ ", "   "),
        };
        let mut line = format!("{prefix}{connector}{}", label(node));
        if let Some(alias) = &node.alias {
            line.push_str(" AS ");
            line.push_str(alias);
        }
        self.lines.push(line);

        let child_prefix = format!("{prefix}{extension}");
        let children = node.children();
        let last = children.len().saturating_sub(1);
        for (i, child) in children.into_iter().enumerate() {
            let branch = if i == last { Branch::Last } else { Branch::Middle };
            child.accept(self, (child_prefix.as_str(), branch));
        }
    }
}

fn label(node: &Expr) -> String {
    match &node.kind {
        ExprKind::Literal(Value::String(text)) => format!("Literal '{text}'"),
        ExprKind::Literal(value) => format!("Literal {value}"),
        ExprKind::Field(name) => format!("Field {name}"),
        ExprKind::ContextVar(name) => format!("ContextVar ${name}"),
        ExprKind::Parameter(param) => format!("Parameter {param}"),
        ExprKind::Compare { op, .. } => format!("Compare {}", op.symbol()),
        ExprKind::Arithmetic { op, .. } => format!("Arithmetic {}", op.symbol()),
        ExprKind::Function {
            name, aggregate, ..
        } => {
            if *aggregate {
                format!("Function {name}() [aggregate]")
            } else {
                format!("Function {name}()")
            }
        }
        ExprKind::Method { name, .. } => format!("Method .{name}()"),
        ExprKind::Reflect(which) => format!("Reflect {}", which.name()),
        _ => node.kind_name().to_owned(),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = TreePrinter { lines: Vec::new() };
        self.accept(&mut printer, ("", Branch::Root));
        f.write_str(&printer.lines.join("\n"))
    }
}
