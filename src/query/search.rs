//! Index-aware search pass.
//!
//! Before a scan starts, [`SearchPlan::build`] walks an expression tree against
//! a [`SearchContext`] and asks every node evaluated against the scanned record
//! for its [`SearchResult`]. Leaf comparisons of the form `field <op> literal`
//! over an indexed class are answered by an index lookup; everything else is
//! left to per-record evaluation.
//!
//! Results live in the plan, keyed by node identity, never on the nodes
//! themselves. A parsed tree can therefore be executed by several threads at
//! once, each with its own plan.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::SearchOptions;
use crate::query::expr::{CompareOp, Expr, ExprKind};
use crate::query::index::{IndexCatalog, PropertyIndex};
use crate::query::profile::{
    profile_timer, record_plan_build, record_profile_count, QueryProfileKind,
};
use crate::query::value::Value;
use crate::types::{RecordId, Result, SombraError};

/// What a scan iterates over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuerySource {
    /// Every record of a class and its subclasses.
    Class(String),
    /// Every record of a cluster.
    Cluster(i16),
    /// An explicit list of records.
    Records(Vec<RecordId>),
    /// The entries of a named index.
    Index(String),
}

/// Read-only inputs of one search pass.
#[derive(Clone, Copy)]
pub struct SearchContext<'a> {
    /// Scan target.
    pub source: &'a QuerySource,
    /// Indexes declared on the target.
    pub catalog: &'a dyn IndexCatalog,
    /// Tuning knobs.
    pub options: SearchOptions,
}

impl<'a> SearchContext<'a> {
    /// Context with default options.
    pub fn new(source: &'a QuerySource, catalog: &'a dyn IndexCatalog) -> Self {
        Self {
            source,
            catalog,
            options: SearchOptions::default(),
        }
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    fn class(&self) -> Option<&'a str> {
        match self.source {
            QuerySource::Class(name) if self.options.use_indexes => Some(name),
            _ => None,
        }
    }
}

/// Whether a node must be evaluated per record or is answered by its sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    /// No index information; evaluate every record.
    Evaluate,
    /// Answer from `included`/`excluded`/`candidates` where possible.
    Filter,
}

/// A set of record identifiers, or every record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdSet {
    /// Every record of the source.
    All,
    /// Exactly these records.
    Set(BTreeSet<RecordId>),
}

impl IdSet {
    /// The empty set.
    pub fn empty() -> Self {
        IdSet::Set(BTreeSet::new())
    }

    /// Membership test.
    pub fn contains(&self, id: &RecordId) -> bool {
        match self {
            IdSet::All => true,
            IdSet::Set(ids) => ids.contains(id),
        }
    }

    /// Whether this is the `All` sentinel.
    pub fn is_all(&self) -> bool {
        matches!(self, IdSet::All)
    }
}

/// Search verdict for one node within one execution.
///
/// At most one of `included` and `excluded` is `All`; the constructors refuse
/// anything else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    state: SearchState,
    included: IdSet,
    excluded: IdSet,
    candidates: Option<BTreeSet<RecordId>>,
}

impl SearchResult {
    /// No optimization: evaluate every record.
    pub fn evaluate() -> Self {
        Self {
            state: SearchState::Evaluate,
            included: IdSet::empty(),
            excluded: IdSet::empty(),
            candidates: None,
        }
    }

    /// Every record satisfies the node.
    pub fn all_included() -> Self {
        Self {
            state: SearchState::Filter,
            included: IdSet::All,
            excluded: IdSet::empty(),
            candidates: None,
        }
    }

    /// No record satisfies the node.
    pub fn all_excluded() -> Self {
        Self {
            state: SearchState::Filter,
            included: IdSet::empty(),
            excluded: IdSet::All,
            candidates: None,
        }
    }

    /// Exactly `ids` satisfy the node. With `narrow`, records outside `ids`
    /// are known to fail as well.
    pub fn matched(ids: BTreeSet<RecordId>, narrow: bool) -> Self {
        let candidates = narrow.then(|| ids.clone());
        Self {
            state: SearchState::Filter,
            included: IdSet::Set(ids),
            excluded: IdSet::empty(),
            candidates,
        }
    }

    /// General `Filter` result.
    pub fn filter(
        included: IdSet,
        excluded: IdSet,
        candidates: Option<BTreeSet<RecordId>>,
    ) -> Result<Self> {
        if included.is_all() && excluded.is_all() {
            return Err(SombraError::Invalid(
                "search result cannot include and exclude every record",
            ));
        }
        Ok(Self {
            state: SearchState::Filter,
            included,
            excluded,
            candidates,
        })
    }

    /// Current state.
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Records known to satisfy the node.
    pub fn included(&self) -> &IdSet {
        &self.included
    }

    /// Records known to fail the node.
    pub fn excluded(&self) -> &IdSet {
        &self.excluded
    }

    /// Optional narrowing set: records outside it fail the node.
    pub fn candidates(&self) -> Option<&BTreeSet<RecordId>> {
        self.candidates.as_ref()
    }

    /// Whether the node is answered from the sets.
    pub fn is_filter(&self) -> bool {
        self.state == SearchState::Filter
    }

    /// Short-circuit answer for a candidate with identity `id`, or `None` when
    /// the node has to be evaluated. The sentinels answer for any candidate;
    /// explicit sets need an identity.
    pub fn verdict(&self, id: Option<RecordId>) -> Option<bool> {
        if self.state == SearchState::Evaluate {
            return None;
        }
        if self.included.is_all() {
            return Some(true);
        }
        if self.excluded.is_all() {
            return Some(false);
        }
        let id = id?;
        if self.included.contains(&id) {
            return Some(true);
        }
        if self.excluded.contains(&id) {
            return Some(false);
        }
        match &self.candidates {
            Some(candidates) if !candidates.contains(&id) => Some(false),
            _ => None,
        }
    }
}

impl Expr {
    /// Search verdict for this node alone. Children are not visited; see
    /// [`SearchPlan::build`] for the whole-tree pass.
    pub fn search_index(&self, ctx: &SearchContext<'_>) -> SearchResult {
        match &self.kind {
            ExprKind::Include => SearchResult::all_included(),
            ExprKind::Exclude => SearchResult::all_excluded(),
            ExprKind::Compare { op, left, right } => {
                match field_literal(*op, left, right) {
                    Some((op, field, literal)) => search_compare(ctx, op, field, literal),
                    None => SearchResult::evaluate(),
                }
            }
            _ => SearchResult::evaluate(),
        }
    }
}

/// Normalizes `field op literal` and `literal op field` to the former.
fn field_literal<'e>(
    op: CompareOp,
    left: &'e Expr,
    right: &'e Expr,
) -> Option<(CompareOp, &'e str, &'e Value)> {
    match (&left.kind, &right.kind) {
        (ExprKind::Field(field), ExprKind::Literal(value)) => Some((op, field, value)),
        (ExprKind::Literal(value), ExprKind::Field(field)) => Some((op.mirrored(), field, value)),
        _ => None,
    }
}

fn search_compare(
    ctx: &SearchContext<'_>,
    op: CompareOp,
    field: &str,
    literal: &Value,
) -> SearchResult {
    let Some(class) = ctx.class() else {
        return SearchResult::evaluate();
    };
    if literal.is_null() || op == CompareOp::Ne {
        return SearchResult::evaluate();
    }
    let exact = op == CompareOp::Eq;
    if !exact && !ctx.options.range_lookups {
        return SearchResult::evaluate();
    }
    let Some(index) = ctx
        .catalog
        .indexes_for(class, field)
        .into_iter()
        .filter(|index| index.key_component_count() == 1)
        .find(|index| {
            if exact {
                index.kind().supports_exact()
            } else {
                index.kind().supports_range()
            }
        })
    else {
        trace!(class, field, op = op.symbol(), "search.index.skip");
        return SearchResult::evaluate();
    };

    let key = match index.key_type().coerce(literal) {
        Ok(key) => key,
        Err(err) => {
            warn!(index = index.name(), field, error = %err, "search.index.key_error");
            return SearchResult::evaluate();
        }
    };

    match lookup(index, op, &key) {
        Ok(ids) if ids.len() > ctx.options.max_index_matches => {
            debug!(
                index = index.name(),
                field,
                matches = ids.len(),
                limit = ctx.options.max_index_matches,
                "search.index.oversize"
            );
            SearchResult::evaluate()
        }
        Ok(ids) => {
            if exact {
                record_profile_count(QueryProfileKind::IndexExact, ids.len() as u64);
                debug!(index = index.name(), field, matches = ids.len(), "search.index.exact");
            } else {
                record_profile_count(QueryProfileKind::IndexRange, ids.len() as u64);
                debug!(index = index.name(), field, matches = ids.len(), "search.index.range");
            }
            SearchResult::matched(ids, ctx.options.narrow_candidates)
        }
        Err(err) => {
            warn!(index = index.name(), field, error = %err, "search.index.key_error");
            SearchResult::evaluate()
        }
    }
}

fn lookup(index: &dyn PropertyIndex, op: CompareOp, key: &Value) -> Result<BTreeSet<RecordId>> {
    match op {
        CompareOp::Eq => index.exact_matches(key),
        CompareOp::Lt => index.below(key, false),
        CompareOp::Le => index.below(key, true),
        CompareOp::Gt => index.above(key, false),
        CompareOp::Ge => index.above(key, true),
        CompareOp::Ne => Err(SombraError::Invalid("inequality has no index lookup")),
    }
}

/// Search results of one execution over one tree.
///
/// The plan borrows the tree, so nodes cannot move or be dropped while it
/// exists. Only `Filter` results are stored; nodes without an entry evaluate
/// normally.
#[derive(Debug, Default)]
pub struct SearchPlan<'e> {
    results: FxHashMap<usize, SearchResult>,
    visited: usize,
    _tree: PhantomData<&'e Expr>,
}

impl<'e> SearchPlan<'e> {
    /// Plan with no results; evaluation through it is plain evaluation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Runs the search pass over `root`, top-down.
    pub fn build(root: &'e Expr, ctx: &SearchContext<'_>) -> Self {
        let start = profile_timer();
        let mut plan = Self::empty();
        plan.visit(root, ctx);
        record_plan_build(start);
        debug!(
            nodes = plan.visited,
            filtered = plan.results.len(),
            "search.plan.build"
        );
        plan
    }

    fn visit(&mut self, node: &'e Expr, ctx: &SearchContext<'_>) {
        self.visited += 1;
        let result = node.search_index(ctx);
        if result.is_filter() {
            self.results.insert(node_key(node), result);
        }
        for child in scanned_children(node) {
            self.visit(child, ctx);
        }
    }

    /// Result recorded for `node`, if the pass resolved it.
    pub fn result(&self, node: &Expr) -> Option<&SearchResult> {
        self.results.get(&node_key(node))
    }

    /// Number of nodes answered from sets.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no node was resolved.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of nodes the pass visited.
    pub fn visited(&self) -> usize {
        self.visited
    }
}

fn node_key(node: &Expr) -> usize {
    node as *const Expr as usize
}

/// Children evaluated against the same candidate as their parent. Path
/// continuations, filter predicates and call arguments see other values and
/// are left out.
fn scanned_children(node: &Expr) -> Vec<&Expr> {
    match &node.kind {
        ExprKind::Path(left, _) => vec![left.as_ref()],
        ExprKind::Filtered { source, .. } | ExprKind::Method { source, .. } => {
            vec![source.as_ref()]
        }
        ExprKind::Function { .. } => Vec::new(),
        _ => node.children().into_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::index::{InMemoryCatalog, InMemoryIndex, IndexKind, KeyType};
    use crate::query::value::Document;

    fn catalog() -> InMemoryCatalog {
        let mut by_name =
            InMemoryIndex::new("Car.name", "Car", &["name"], IndexKind::Unique, KeyType::String);
        for (pos, name) in ["tempo", "fiesta"].into_iter().enumerate() {
            let doc = Document::new("Car")
                .with_id(RecordId::new(8, pos as i64))
                .with_field("name", name);
            by_name.insert_document(&doc).unwrap();
        }
        InMemoryCatalog::new().with_index(by_name)
    }

    #[test]
    fn equality_uses_the_index() {
        let catalog = catalog();
        let source = QuerySource::Class("Car".into());
        let ctx = SearchContext::new(&source, &catalog);
        let expr = Expr::eq(Expr::literal("fiesta"), Expr::field("name"));
        let result = expr.search_index(&ctx);
        assert_eq!(result.state(), SearchState::Filter);
        assert_eq!(
            result.included(),
            &IdSet::Set(BTreeSet::from([RecordId::new(8, 1)]))
        );
        assert_eq!(result.verdict(Some(RecordId::new(8, 1))), Some(true));
        assert_eq!(result.verdict(Some(RecordId::new(8, 0))), Some(false));
        assert_eq!(result.verdict(None), None);
    }

    #[test]
    fn sentinels_and_fallbacks() {
        let catalog = catalog();
        let source = QuerySource::Class("Car".into());
        let ctx = SearchContext::new(&source, &catalog);
        assert_eq!(Expr::include().search_index(&ctx).verdict(None), Some(true));
        assert_eq!(Expr::exclude().search_index(&ctx).verdict(None), Some(false));
        let unindexed = Expr::eq(Expr::field("size"), Expr::literal(160));
        assert_eq!(unindexed.search_index(&ctx), SearchResult::evaluate());
        let null = Expr::eq(Expr::field("name"), Expr::literal(Value::Null));
        assert_eq!(null.search_index(&ctx), SearchResult::evaluate());
        let ne = Expr::ne(Expr::field("name"), Expr::literal("tempo"));
        assert_eq!(ne.search_index(&ctx), SearchResult::evaluate());
    }

    #[test]
    fn filter_rejects_contradictory_sentinels() {
        assert!(SearchResult::filter(IdSet::All, IdSet::All, None).is_err());
        let partial = SearchResult::filter(
            IdSet::empty(),
            IdSet::Set(BTreeSet::from([RecordId::new(1, 1)])),
            None,
        )
        .unwrap();
        assert_eq!(partial.verdict(Some(RecordId::new(1, 1))), Some(false));
        assert_eq!(partial.verdict(Some(RecordId::new(1, 2))), None);
    }

    #[test]
    fn plan_skips_nodes_seen_by_other_candidates() {
        let catalog = catalog();
        let source = QuerySource::Class("Car".into());
        let ctx = SearchContext::new(&source, &catalog);
        let inner = Expr::eq(Expr::field("name"), Expr::literal("tempo"));
        let filtered = Expr::filtered(Expr::field("parts"), vec![inner.clone()]);
        let expr = Expr::and(vec![inner, filtered]);
        let plan = SearchPlan::build(&expr, &ctx);
        assert_eq!(plan.len(), 1);
        let ExprKind::And(children) = &expr.kind else {
            unreachable!()
        };
        assert!(plan.result(&children[0]).is_some());
        assert!(plan.result(&children[1]).is_none());
        assert!(plan.visited() >= 4);
    }
}
