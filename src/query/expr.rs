//! Expression tree.
//!
//! A parsed predicate or projection is an owned tree of [`Expr`] nodes. The tree is
//! built once per command and treated as immutable afterwards: evaluation and the
//! search pass only borrow it, and rewrites (parameter resolution, binding,
//! simplification) produce new trees.

use std::convert::Infallible;
use std::fmt;

use smallvec::SmallVec;

use crate::query::value::Value;

/// Comparison operators answered by the value comparator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn mirrored(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }
}

/// Arithmetic operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`, also string concatenation.
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `^`
    Power,
}

impl ArithOp {
    /// Operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
            ArithOp::Modulo => "%",
            ArithOp::Power => "^",
        }
    }
}

/// Record attributes exposed through `@name` accessors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reflect {
    /// `@class`
    Class,
    /// `@rid`
    Id,
    /// `@size`, serialized length in bytes.
    Size,
    /// `@this`
    This,
    /// `@type`
    Type,
    /// `@version`
    Version,
    /// `@raw`
    Raw,
}

impl Reflect {
    /// Accessor name including the `@`.
    pub fn name(self) -> &'static str {
        match self {
            Reflect::Class => "@class",
            Reflect::Id => "@rid",
            Reflect::Size => "@size",
            Reflect::This => "@this",
            Reflect::Type => "@type",
            Reflect::Version => "@version",
            Reflect::Raw => "@raw",
        }
    }
}

/// Deferred argument placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    /// `?`, numbered from zero in order of appearance.
    Positional(usize),
    /// `:name`
    Named(String),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Positional(i) => write!(f, "?{i}"),
            Param::Named(name) => write!(f, ":{name}"),
        }
    }
}

/// Node variants. Arity is fixed by the variant: binary operators hold exactly two
/// boxed children.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// Constant value.
    Literal(Value),
    /// Field of the candidate.
    Field(String),
    /// Variable from the evaluation context (`$name`).
    ContextVar(String),
    /// Unresolved placeholder.
    Parameter(Param),
    /// `left.right`: right evaluated against left's result.
    Path(Box<Expr>, Box<Expr>),
    /// `[a, b, ...]`
    Collection(Vec<Expr>),
    /// `{k: v, ...}`
    Map(Vec<(Expr, Expr)>),
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `left LIKE pattern`
    Like(Box<Expr>, Box<Expr>),
    /// `left INSTANCEOF class`
    InstanceOf(Box<Expr>, Box<Expr>),
    /// `left IN right`
    In(Box<Expr>, Box<Expr>),
    /// `target BETWEEN low AND high`, inclusive.
    Between {
        /// Tested value.
        target: Box<Expr>,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
    },
    /// `expr IS NULL`
    IsNull(Box<Expr>),
    /// `expr IS NOT NULL`
    IsNotNull(Box<Expr>),
    /// `expr IS DEFINED`
    IsDefined(Box<Expr>),
    /// Binary arithmetic.
    Arithmetic {
        /// Operator.
        op: ArithOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `source[...]`: index, range slice, key lookup or predicate filter.
    Filtered {
        /// Container being indexed.
        source: Box<Expr>,
        /// Bracketed expressions.
        filters: Vec<Expr>,
    },
    /// Function call.
    Function {
        /// Name as written.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Set by binding when the function aggregates over a group.
        aggregate: bool,
    },
    /// Method call on a value: `source.name(args)`.
    Method {
        /// Name as written.
        name: String,
        /// Receiver.
        source: Box<Expr>,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// `@` accessor.
    Reflect(Reflect),
    /// Always true.
    Include,
    /// Always false.
    Exclude,
    /// Every value of the candidate, matched existentially.
    Any,
    /// Every value of the candidate, matched universally.
    All,
}

/// Expression node: a variant plus an optional projection alias.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    /// Variant and children.
    pub kind: ExprKind,
    /// Explicit alias; see [`Expr::alias`] for the default.
    pub alias: Option<String>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr { kind, alias: None }
    }
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    /// Constant.
    pub fn literal(value: impl Into<Value>) -> Expr {
        ExprKind::Literal(value.into()).into()
    }

    /// Field reference.
    pub fn field(name: impl Into<String>) -> Expr {
        ExprKind::Field(name.into()).into()
    }

    /// Context variable.
    pub fn context_var(name: impl Into<String>) -> Expr {
        ExprKind::ContextVar(name.into()).into()
    }

    /// Positional `?` placeholder.
    pub fn positional(index: usize) -> Expr {
        ExprKind::Parameter(Param::Positional(index)).into()
    }

    /// Named `:name` placeholder.
    pub fn named(name: impl Into<String>) -> Expr {
        ExprKind::Parameter(Param::Named(name.into())).into()
    }

    /// `left.right`
    pub fn path(left: Expr, right: Expr) -> Expr {
        ExprKind::Path(Box::new(left), Box::new(right)).into()
    }

    /// Builds a path from dotted field names; `None` when `names` is empty.
    pub fn field_path<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Expr> {
        names
            .into_iter()
            .map(Expr::field)
            .reduce(Expr::path)
    }

    /// `[items]`
    pub fn collection(items: Vec<Expr>) -> Expr {
        ExprKind::Collection(items).into()
    }

    /// `{entries}`
    pub fn map(entries: Vec<(Expr, Expr)>) -> Expr {
        ExprKind::Map(entries).into()
    }

    /// Conjunction.
    pub fn and(children: Vec<Expr>) -> Expr {
        ExprKind::And(children).into()
    }

    /// Disjunction.
    pub fn or(children: Vec<Expr>) -> Expr {
        ExprKind::Or(children).into()
    }

    /// Negation.
    pub fn not(child: Expr) -> Expr {
        ExprKind::Not(Box::new(child)).into()
    }

    /// Comparison with an explicit operator.
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        ExprKind::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .into()
    }

    /// `left = right`
    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Eq, left, right)
    }

    /// `left <> right`
    pub fn ne(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Ne, left, right)
    }

    /// `left < right`
    pub fn lt(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Lt, left, right)
    }

    /// `left <= right`
    pub fn le(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Le, left, right)
    }

    /// `left > right`
    pub fn gt(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Gt, left, right)
    }

    /// `left >= right`
    pub fn ge(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Ge, left, right)
    }

    /// `left LIKE pattern`
    pub fn like(left: Expr, pattern: Expr) -> Expr {
        ExprKind::Like(Box::new(left), Box::new(pattern)).into()
    }

    /// `left INSTANCEOF class`
    pub fn instance_of(left: Expr, class: Expr) -> Expr {
        ExprKind::InstanceOf(Box::new(left), Box::new(class)).into()
    }

    /// `left IN right`
    pub fn is_in(left: Expr, right: Expr) -> Expr {
        ExprKind::In(Box::new(left), Box::new(right)).into()
    }

    /// `target BETWEEN low AND high`
    pub fn between(target: Expr, low: Expr, high: Expr) -> Expr {
        ExprKind::Between {
            target: Box::new(target),
            low: Box::new(low),
            high: Box::new(high),
        }
        .into()
    }

    /// `expr IS NULL`
    pub fn is_null(expr: Expr) -> Expr {
        ExprKind::IsNull(Box::new(expr)).into()
    }

    /// `expr IS NOT NULL`
    pub fn is_not_null(expr: Expr) -> Expr {
        ExprKind::IsNotNull(Box::new(expr)).into()
    }

    /// `expr IS DEFINED`
    pub fn is_defined(expr: Expr) -> Expr {
        ExprKind::IsDefined(Box::new(expr)).into()
    }

    /// Binary arithmetic.
    pub fn arith(op: ArithOp, left: Expr, right: Expr) -> Expr {
        ExprKind::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .into()
    }

    /// `source[filters]`
    pub fn filtered(source: Expr, filters: Vec<Expr>) -> Expr {
        ExprKind::Filtered {
            source: Box::new(source),
            filters,
        }
        .into()
    }

    /// Unbound function call.
    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        ExprKind::Function {
            name: name.into(),
            args,
            aggregate: false,
        }
        .into()
    }

    /// Method call.
    pub fn method(source: Expr, name: impl Into<String>, args: Vec<Expr>) -> Expr {
        ExprKind::Method {
            name: name.into(),
            source: Box::new(source),
            args,
        }
        .into()
    }

    /// `@` accessor.
    pub fn reflect(which: Reflect) -> Expr {
        ExprKind::Reflect(which).into()
    }

    /// Always-true sentinel.
    pub fn include() -> Expr {
        ExprKind::Include.into()
    }

    /// Always-false sentinel.
    pub fn exclude() -> Expr {
        ExprKind::Exclude.into()
    }

    /// `any()` sentinel.
    pub fn any() -> Expr {
        ExprKind::Any.into()
    }

    /// `all()` sentinel.
    pub fn all() -> Expr {
        ExprKind::All.into()
    }

    /// Attaches an explicit alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Expr {
        self.alias = Some(alias.into());
        self
    }

    /// Projection name: the explicit alias, else a per-kind default.
    pub fn alias(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.kind {
            ExprKind::Field(name) => name.clone(),
            ExprKind::ContextVar(name) => format!("${name}"),
            ExprKind::Function { name, .. } | ExprKind::Method { name, .. } => name.clone(),
            ExprKind::Path(left, _) => left.alias(),
            ExprKind::Filtered { source, .. } => source.alias(),
            ExprKind::Reflect(which) => which.name().to_owned(),
            ExprKind::Literal(value) => value.to_string(),
            other => kind_name(other).to_ascii_lowercase(),
        }
    }

    /// Variant name used in tree dumps.
    pub fn kind_name(&self) -> &'static str {
        kind_name(&self.kind)
    }

    /// Independent of the evaluation context: no context variables or
    /// placeholders, and no aggregation.
    pub fn is_context_free(&self) -> bool {
        match &self.kind {
            ExprKind::ContextVar(_) | ExprKind::Parameter(_) => false,
            ExprKind::Function {
                aggregate: true, ..
            } => false,
            _ => self.children().iter().all(|child| child.is_context_free()),
        }
    }

    /// Independent of the candidate record.
    pub fn is_document_free(&self) -> bool {
        match &self.kind {
            ExprKind::Field(_) | ExprKind::Reflect(_) | ExprKind::Any | ExprKind::All => false,
            ExprKind::Function {
                aggregate: true, ..
            } => false,
            _ => self.children().iter().all(|child| child.is_document_free()),
        }
    }

    /// Constant for the whole command: both context- and document-free.
    pub fn is_static(&self) -> bool {
        self.is_context_free() && self.is_document_free()
    }

    /// True for aggregate function calls, whose evaluation the grouping layer
    /// defers to the end of a group.
    pub fn is_aggregation(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Function {
                aggregate: true,
                ..
            }
        )
    }

    /// Whether any node of the subtree aggregates.
    pub fn contains_aggregation(&self) -> bool {
        self.is_aggregation() || self.children().iter().any(|child| child.contains_aggregation())
    }

    /// Flattens nested paths into the ordered list of steps: `a.b.c` gives
    /// `[a, b, c]` whatever the nesting. Non-path nodes unfold to themselves.
    pub fn unfold(&self) -> Vec<&Expr> {
        let mut steps = Vec::new();
        self.unfold_into(&mut steps);
        steps
    }

    fn unfold_into<'a>(&'a self, steps: &mut Vec<&'a Expr>) {
        match &self.kind {
            ExprKind::Path(left, right) => {
                left.unfold_into(steps);
                right.unfold_into(steps);
            }
            _ => steps.push(self),
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> SmallVec<[&Expr; 4]> {
        let mut out = SmallVec::new();
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Field(_)
            | ExprKind::ContextVar(_)
            | ExprKind::Parameter(_)
            | ExprKind::Reflect(_)
            | ExprKind::Include
            | ExprKind::Exclude
            | ExprKind::Any
            | ExprKind::All => {}
            ExprKind::Path(a, b)
            | ExprKind::Like(a, b)
            | ExprKind::InstanceOf(a, b)
            | ExprKind::In(a, b)
            | ExprKind::Compare {
                left: a, right: b, ..
            }
            | ExprKind::Arithmetic {
                left: a, right: b, ..
            } => {
                out.push(a.as_ref());
                out.push(b.as_ref());
            }
            ExprKind::Collection(items)
            | ExprKind::And(items)
            | ExprKind::Or(items)
            | ExprKind::Function { args: items, .. } => out.extend(items.iter()),
            ExprKind::Map(entries) => {
                for (key, value) in entries {
                    out.push(key);
                    out.push(value);
                }
            }
            ExprKind::Not(inner)
            | ExprKind::IsNull(inner)
            | ExprKind::IsNotNull(inner)
            | ExprKind::IsDefined(inner) => out.push(inner.as_ref()),
            ExprKind::Between { target, low, high } => {
                out.push(target.as_ref());
                out.push(low.as_ref());
                out.push(high.as_ref());
            }
            ExprKind::Filtered { source, filters } => {
                out.push(source.as_ref());
                out.extend(filters.iter());
            }
            ExprKind::Method { source, args, .. } => {
                out.push(source.as_ref());
                out.extend(args.iter());
            }
        }
        out
    }

    /// Rebuilds this node with every direct child replaced by `f(child)`. Leaves
    /// are rebuilt from their payload. The alias is kept.
    pub fn try_map_children<E, F>(&self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(&Expr) -> Result<Expr, E>,
    {
        let mut boxed = |child: &Expr| f(child).map(Box::new);
        let kind = match &self.kind {
            ExprKind::Literal(value) => ExprKind::Literal(value.clone()),
            ExprKind::Field(name) => ExprKind::Field(name.clone()),
            ExprKind::ContextVar(name) => ExprKind::ContextVar(name.clone()),
            ExprKind::Parameter(param) => ExprKind::Parameter(param.clone()),
            ExprKind::Reflect(which) => ExprKind::Reflect(*which),
            ExprKind::Include => ExprKind::Include,
            ExprKind::Exclude => ExprKind::Exclude,
            ExprKind::Any => ExprKind::Any,
            ExprKind::All => ExprKind::All,
            ExprKind::Path(a, b) => ExprKind::Path(boxed(a)?, boxed(b)?),
            ExprKind::Like(a, b) => ExprKind::Like(boxed(a)?, boxed(b)?),
            ExprKind::InstanceOf(a, b) => ExprKind::InstanceOf(boxed(a)?, boxed(b)?),
            ExprKind::In(a, b) => ExprKind::In(boxed(a)?, boxed(b)?),
            ExprKind::Compare { op, left, right } => ExprKind::Compare {
                op: *op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            ExprKind::Arithmetic { op, left, right } => ExprKind::Arithmetic {
                op: *op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            ExprKind::Not(inner) => ExprKind::Not(boxed(inner)?),
            ExprKind::IsNull(inner) => ExprKind::IsNull(boxed(inner)?),
            ExprKind::IsNotNull(inner) => ExprKind::IsNotNull(boxed(inner)?),
            ExprKind::IsDefined(inner) => ExprKind::IsDefined(boxed(inner)?),
            ExprKind::Between { target, low, high } => ExprKind::Between {
                target: boxed(target)?,
                low: boxed(low)?,
                high: boxed(high)?,
            },
            ExprKind::Filtered { source, filters } => ExprKind::Filtered {
                source: boxed(source)?,
                filters: map_all(filters, &mut boxed)?,
            },
            ExprKind::Method { name, source, args } => ExprKind::Method {
                name: name.clone(),
                source: boxed(source)?,
                args: map_all(args, &mut boxed)?,
            },
            ExprKind::Collection(items) => ExprKind::Collection(map_all(items, &mut boxed)?),
            ExprKind::And(items) => ExprKind::And(map_all(items, &mut boxed)?),
            ExprKind::Or(items) => ExprKind::Or(map_all(items, &mut boxed)?),
            ExprKind::Function {
                name,
                args,
                aggregate,
            } => ExprKind::Function {
                name: name.clone(),
                args: map_all(args, &mut boxed)?,
                aggregate: *aggregate,
            },
            ExprKind::Map(entries) => ExprKind::Map(
                entries
                    .iter()
                    .map(|(key, value)| -> Result<(Expr, Expr), E> {
                        Ok((*boxed(key)?, *boxed(value)?))
                    })
                    .collect::<Result<_, E>>()?,
            ),
        };
        Ok(Expr {
            kind,
            alias: self.alias.clone(),
        })
    }

    /// Infallible form of [`Expr::try_map_children`].
    pub fn map_children<F>(&self, mut f: F) -> Expr
    where
        F: FnMut(&Expr) -> Expr,
    {
        match self.try_map_children::<Infallible, _>(|child| Ok(f(child))) {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }
}

fn map_all<E>(
    items: &[Expr],
    f: &mut impl FnMut(&Expr) -> Result<Box<Expr>, E>,
) -> Result<Vec<Expr>, E> {
    items.iter().map(|item| f(item).map(|b| *b)).collect()
}

fn kind_name(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Literal(_) => "Literal",
        ExprKind::Field(_) => "Field",
        ExprKind::ContextVar(_) => "ContextVar",
        ExprKind::Parameter(_) => "Parameter",
        ExprKind::Path(..) => "Path",
        ExprKind::Collection(_) => "Collection",
        ExprKind::Map(_) => "Map",
        ExprKind::And(_) => "And",
        ExprKind::Or(_) => "Or",
        ExprKind::Not(_) => "Not",
        ExprKind::Compare { .. } => "Compare",
        ExprKind::Like(..) => "Like",
        ExprKind::InstanceOf(..) => "InstanceOf",
        ExprKind::In(..) => "In",
        ExprKind::Between { .. } => "Between",
        ExprKind::IsNull(_) => "IsNull",
        ExprKind::IsNotNull(_) => "IsNotNull",
        ExprKind::IsDefined(_) => "IsDefined",
        ExprKind::Arithmetic { .. } => "Arithmetic",
        ExprKind::Filtered { .. } => "Filtered",
        ExprKind::Function { .. } => "Function",
        ExprKind::Method { .. } => "Method",
        ExprKind::Reflect(_) => "Reflect",
        ExprKind::Include => "Include",
        ExprKind::Exclude => "Exclude",
        ExprKind::Any => "Any",
        ExprKind::All => "All",
    }
}
