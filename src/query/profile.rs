use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of search and evaluation profiling counters.
///
/// Profiling is enabled via the `SOMBRA_PROFILE` environment variable; when it is
/// unset every recording call is a cheap no-op and snapshots stay zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent building search plans.
    pub plan_build_ns: u64,
    /// Number of search plans built.
    pub plan_build_count: u64,
    /// Exact-match index lookups issued.
    pub index_exact_count: u64,
    /// Range index lookups issued.
    pub index_range_count: u64,
    /// Record identifiers returned by index lookups.
    pub index_ids_returned: u64,
    /// Evaluations answered `true` from a search result.
    pub shortcut_true_count: u64,
    /// Evaluations answered `false` from a search result.
    pub shortcut_false_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    plan_build_ns: AtomicU64,
    plan_build_count: AtomicU64,
    index_exact_count: AtomicU64,
    index_range_count: AtomicU64,
    index_ids_returned: AtomicU64,
    shortcut_true_count: AtomicU64,
    shortcut_false_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SOMBRA_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Exact-match lookup; the count is the number of identifiers returned.
    IndexExact,
    /// Range lookup; the count is the number of identifiers returned.
    IndexRange,
    /// Short-circuit to `true`.
    ShortcutTrue,
    /// Short-circuit to `false`.
    ShortcutFalse,
}

pub(crate) fn record_plan_build(start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    counters.plan_build_ns.fetch_add(nanos, Ordering::Relaxed);
    counters.plan_build_count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_profile_count(kind: QueryProfileKind, amount: u64) {
    let Some(counters) = counters() else {
        return;
    };
    match kind {
        QueryProfileKind::IndexExact => {
            counters.index_exact_count.fetch_add(1, Ordering::Relaxed);
            counters
                .index_ids_returned
                .fetch_add(amount, Ordering::Relaxed);
        }
        QueryProfileKind::IndexRange => {
            counters.index_range_count.fetch_add(1, Ordering::Relaxed);
            counters
                .index_ids_returned
                .fetch_add(amount, Ordering::Relaxed);
        }
        QueryProfileKind::ShortcutTrue => {
            counters
                .shortcut_true_count
                .fetch_add(amount, Ordering::Relaxed);
        }
        QueryProfileKind::ShortcutFalse => {
            counters
                .shortcut_false_count
                .fetch_add(amount, Ordering::Relaxed);
        }
    }
}

/// Returns the current counters, optionally resetting them to zero.
///
/// Returns `None` when profiling is disabled.
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        plan_build_ns: load(&counters.plan_build_ns),
        plan_build_count: load(&counters.plan_build_count),
        index_exact_count: load(&counters.index_exact_count),
        index_range_count: load(&counters.index_range_count),
        index_ids_returned: load(&counters.index_ids_returned),
        shortcut_true_count: load(&counters.shortcut_true_count),
        shortcut_false_count: load(&counters.shortcut_false_count),
    })
}
