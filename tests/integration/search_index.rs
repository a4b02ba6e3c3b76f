#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Once;

use sombra_expr::config::SearchOptions;
use sombra_expr::query::index::{InMemoryCatalog, InMemoryIndex};
use sombra_expr::query::store::InMemoryStore;
use sombra_expr::query::{
    Document, EvalContext, Expr, IdSet, IndexKind, KeyType, QuerySource, SearchContext,
    SearchPlan, SearchResult, SearchState, Value,
};
use sombra_expr::types::RecordId;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_expr=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

const CARS: [(&str, i32); 4] = [("tempo", 250), ("fiesta", 160), ("no-name", 260), ("supreme", 310)];

fn rid(position: i64) -> RecordId {
    RecordId::new(8, position)
}

fn store() -> InMemoryStore {
    let mut store = InMemoryStore::new().with_class("Car", None);
    for (pos, (name, size)) in CARS.into_iter().enumerate() {
        store
            .insert(
                Document::new("Car")
                    .with_id(rid(pos as i64))
                    .with_field("name", name)
                    .with_field("size", size),
            )
            .unwrap();
    }
    store
}

fn index_on(
    store: &InMemoryStore,
    name: &str,
    fields: &[&str],
    kind: IndexKind,
    key_type: KeyType,
) -> InMemoryIndex {
    let mut index = InMemoryIndex::new(name, "Car", fields, kind, key_type);
    for doc in store.scan_class("Car") {
        index.insert_document(doc).unwrap();
    }
    index
}

fn catalog(store: &InMemoryStore) -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_index(index_on(store, "Car.name", &["name"], IndexKind::Unique, KeyType::String))
        .with_index(index_on(
            store,
            "Car.size",
            &["size"],
            IndexKind::NotUnique,
            KeyType::Integer,
        ))
}

fn scan(store: &InMemoryStore, expr: &Expr, plan: Option<&SearchPlan<'_>>) -> BTreeSet<RecordId> {
    let ctx = EvalContext::new().with_store(store);
    let ctx = match plan {
        Some(plan) => ctx.with_plan(plan),
        None => ctx,
    };
    store
        .scan_class("Car")
        .filter(|doc| expr.matches(&ctx, &Value::from((*doc).clone())))
        .filter_map(|doc| doc.id)
        .collect()
}

fn predicates() -> Vec<Expr> {
    vec![
        Expr::eq(Expr::field("name"), Expr::literal("fiesta")),
        Expr::eq(Expr::literal("tempo"), Expr::field("name")),
        Expr::eq(Expr::field("name"), Expr::literal("missing")),
        Expr::lt(Expr::field("size"), Expr::literal(260)),
        Expr::ge(Expr::field("size"), Expr::literal(260)),
        Expr::gt(Expr::literal(250), Expr::field("size")),
        Expr::le(Expr::field("size"), Expr::literal(250.0)),
        Expr::and(vec![
            Expr::gt(Expr::field("size"), Expr::literal(200)),
            Expr::not(Expr::eq(Expr::field("name"), Expr::literal("tempo"))),
        ]),
        Expr::or(vec![
            Expr::eq(Expr::field("name"), Expr::literal("supreme")),
            Expr::lt(Expr::field("size"), Expr::literal(200)),
        ]),
        Expr::and(vec![Expr::include(), Expr::ne(Expr::field("name"), Expr::literal("x"))]),
        Expr::or(vec![Expr::exclude(), Expr::like(Expr::field("name"), Expr::literal("%e%"))]),
    ]
}

#[test]
fn equality_returns_exact_identifier() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let source = QuerySource::Class("Car".into());
    let ctx = SearchContext::new(&source, &catalog);
    let expr = Expr::eq(Expr::field("name"), Expr::literal("fiesta"));
    let result = expr.search_index(&ctx);
    assert_eq!(result.state(), SearchState::Filter);
    assert_eq!(result.included(), &IdSet::Set(BTreeSet::from([rid(1)])));
    assert_eq!(result.candidates(), Some(&BTreeSet::from([rid(1)])));
}

#[test]
fn search_is_idempotent() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let source = QuerySource::Class("Car".into());
    let ctx = SearchContext::new(&source, &catalog);
    for expr in predicates() {
        assert_eq!(expr.search_index(&ctx), expr.search_index(&ctx));
        let first = SearchPlan::build(&expr, &ctx);
        let second = SearchPlan::build(&expr, &ctx);
        assert_eq!(first.len(), second.len());
        assert_eq!(first.visited(), second.visited());
    }
}

#[test]
fn first_eligible_index_wins() {
    init_tracing();
    let store = store();
    let mut partial = InMemoryIndex::new(
        "Car.size.partial",
        "Car",
        &["size"],
        IndexKind::UniqueHash,
        KeyType::Integer,
    );
    partial.insert(Value::Int(160), rid(7)).unwrap();
    let catalog = InMemoryCatalog::new()
        .with_index(index_on(
            &store,
            "Car.size_name",
            &["size", "name"],
            IndexKind::Unique,
            KeyType::Integer,
        ))
        .with_index(index_on(&store, "Car.size.text", &["size"], IndexKind::FullText, KeyType::Integer))
        .with_index(partial)
        .with_index(index_on(&store, "Car.size", &["size"], IndexKind::NotUnique, KeyType::Integer));
    let source = QuerySource::Class("Car".into());
    let ctx = SearchContext::new(&source, &catalog);

    let exact = Expr::eq(Expr::field("size"), Expr::literal(160)).search_index(&ctx);
    assert_eq!(exact.included(), &IdSet::Set(BTreeSet::from([rid(7)])));

    // The hash index cannot answer ranges, so the tree index does.
    let range = Expr::lt(Expr::field("size"), Expr::literal(200)).search_index(&ctx);
    assert_eq!(range.included(), &IdSet::Set(BTreeSet::from([rid(1)])));
}

#[test]
fn malformed_key_falls_back_to_evaluation() {
    init_tracing();
    let mut store = InMemoryStore::new().with_class("Car", None).with_class("Person", None);
    store
        .insert(
            Document::new("Person")
                .with_id(RecordId::new(9, 0))
                .with_field("car", rid(1)),
        )
        .unwrap();
    let mut owners =
        InMemoryIndex::new("Person.car", "Person", &["car"], IndexKind::NotUnique, KeyType::Link);
    for doc in store.scan_class("Person") {
        owners.insert_document(doc).unwrap();
    }
    let catalog = InMemoryCatalog::new().with_index(owners);
    let source = QuerySource::Class("Person".into());
    let ctx = SearchContext::new(&source, &catalog);

    let malformed = Expr::eq(Expr::field("car"), Expr::literal("not-an-id"));
    assert_eq!(malformed.search_index(&ctx), SearchResult::evaluate());

    let textual = Expr::eq(Expr::field("car"), Expr::literal("#8:1"));
    let result = textual.search_index(&ctx);
    assert_eq!(result.included(), &IdSet::Set(BTreeSet::from([RecordId::new(9, 0)])));

    let typed = Expr::eq(Expr::field("car"), Expr::literal(5));
    assert_eq!(typed.search_index(&ctx).state(), SearchState::Evaluate);
}

#[test]
fn single_precision_literals_are_not_answered_by_integer_keys() {
    init_tracing();
    let mut store = InMemoryStore::new().with_class("Car", None);
    store
        .insert(
            Document::new("Car")
                .with_id(rid(0))
                .with_field("name", "wide")
                .with_field("size", 16_777_217i32),
        )
        .unwrap();
    let catalog = InMemoryCatalog::new().with_index(index_on(
        &store,
        "Car.size",
        &["size"],
        IndexKind::NotUnique,
        KeyType::Integer,
    ));
    let source = QuerySource::Class("Car".into());
    let ctx = SearchContext::new(&source, &catalog);
    let literal = || Expr::literal(16_777_216.0f32);
    for expr in [
        Expr::eq(Expr::field("size"), literal()),
        Expr::le(Expr::field("size"), literal()),
        Expr::ge(literal(), Expr::field("size")),
        Expr::gt(Expr::field("size"), literal()),
    ] {
        assert_eq!(expr.search_index(&ctx), SearchResult::evaluate(), "{expr}");
        let plan = SearchPlan::build(&expr, &ctx);
        assert_eq!(scan(&store, &expr, Some(&plan)), scan(&store, &expr, None), "{expr}");
    }
    let eq = Expr::eq(Expr::field("size"), literal());
    assert_eq!(scan(&store, &eq, None), BTreeSet::from([rid(0)]));
}

#[test]
fn only_class_sources_are_optimized() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let expr = Expr::eq(Expr::field("name"), Expr::literal("fiesta"));
    for source in [
        QuerySource::Cluster(8),
        QuerySource::Records(vec![rid(0), rid(1)]),
        QuerySource::Index("Car.name".into()),
        QuerySource::Class("Boat".into()),
    ] {
        let ctx = SearchContext::new(&source, &catalog);
        assert_eq!(expr.search_index(&ctx), SearchResult::evaluate());
    }
}

#[test]
fn plans_never_change_scan_results() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let source = QuerySource::Class("Car".into());
    let narrow = SearchContext::new(&source, &catalog);
    let wide = narrow.with_options(SearchOptions {
        narrow_candidates: false,
        ..SearchOptions::default()
    });
    for expr in predicates() {
        let expected = scan(&store, &expr, None);
        for ctx in [&narrow, &wide] {
            let plan = SearchPlan::build(&expr, ctx);
            assert_eq!(scan(&store, &expr, Some(&plan)), expected, "{expr}");
        }
    }
    let fiesta = Expr::eq(Expr::field("name"), Expr::literal("fiesta"));
    assert_eq!(scan(&store, &fiesta, None), BTreeSet::from([rid(1)]));
}

#[test]
fn plans_are_per_execution() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let source = QuerySource::Class("Car".into());
    let shared = Expr::and(vec![
        Expr::ge(Expr::field("size"), Expr::literal(250)),
        Expr::ne(Expr::field("name"), Expr::literal("supreme")),
    ]);
    let expected = scan(&store, &shared, None);
    std::thread::scope(|scope| {
        let handles: Vec<_> = [true, false]
            .into_iter()
            .map(|use_indexes| {
                let (store, catalog, source, shared) = (&store, &catalog, &source, &shared);
                scope.spawn(move || {
                    let ctx = SearchContext::new(source, catalog).with_options(SearchOptions {
                        use_indexes,
                        ..SearchOptions::default()
                    });
                    let plan = SearchPlan::build(shared, &ctx);
                    (plan.len(), scan(store, shared, Some(&plan)))
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes[0], (1, expected.clone()));
        assert_eq!(outcomes[1], (0, expected.clone()));
    });
}

#[test]
fn options_limit_index_use() {
    init_tracing();
    let store = store();
    let catalog = catalog(&store);
    let source = QuerySource::Class("Car".into());
    let base = SearchContext::new(&source, &catalog);
    let eq = Expr::eq(Expr::field("name"), Expr::literal("tempo"));
    let gt = Expr::gt(Expr::field("size"), Expr::literal(100));

    let no_ranges = base.with_options(SearchOptions {
        range_lookups: false,
        ..SearchOptions::default()
    });
    assert!(eq.search_index(&no_ranges).is_filter());
    assert!(!gt.search_index(&no_ranges).is_filter());

    let small = base.with_options(SearchOptions {
        max_index_matches: 2,
        ..SearchOptions::default()
    });
    assert!(eq.search_index(&small).is_filter());
    assert_eq!(gt.search_index(&small), SearchResult::evaluate());

    let off = base.with_options(SearchOptions {
        use_indexes: false,
        ..SearchOptions::default()
    });
    assert!(SearchPlan::build(&Expr::and(vec![eq, gt]), &off).is_empty());
}
