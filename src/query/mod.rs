#![forbid(unsafe_code)]

//! Expression evaluation and index-aware search.
//!
//! A parsed predicate is an [`Expr`] tree. Preparation passes in [`visitor`]
//! bind calls, resolve parameters and simplify; [`search`] turns indexed leaf
//! comparisons into record sets once per execution; [`eval`] then answers the
//! predicate per candidate record.

/// Comparison and equality across value kinds.
///
/// Decides numeric promotion, date and record-id parsing, and composite key
/// ordering for every other module.
pub mod compare;

/// Per-record evaluation of expression trees.
pub mod eval;

/// Expression tree model and its static classification flags.
pub mod expr;

/// Named functions and methods callable from expressions.
pub mod functions;

/// Index contract consumed by the search pass, with in-memory implementations.
pub mod index;

/// Performance profiling for search and evaluation.
///
/// Collects plan timings and shortcut counts when `SOMBRA_PROFILE` is set.
pub mod profile;

/// Index-aware search results and per-execution plans.
pub mod search;

/// Record lookups used while following links.
pub mod store;

/// Date parsing and formatting.
pub mod temporal;

/// Runtime values.
pub mod value;

/// Visitors, rewriters and preparation passes.
pub mod visitor;

pub use eval::EvalContext;
pub use expr::{ArithOp, CompareOp, Expr, ExprKind, Param, Reflect};
pub use functions::{FunctionRegistry, SqlFunction, SqlMethod};
pub use index::{IndexCatalog, IndexKind, KeyType, PropertyIndex};
pub use search::{IdSet, QuerySource, SearchContext, SearchPlan, SearchResult, SearchState};
pub use store::RecordStore;
pub use value::{CompositeKey, Document, Value};
pub use visitor::{Binder, ExprRewriter, ExprVisitor, ParameterResolver, Simplifier};
