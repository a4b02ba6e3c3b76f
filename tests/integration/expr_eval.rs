#![allow(missing_docs)]

use std::sync::Once;

use sombra_expr::query::expr::{ArithOp, Reflect};
use sombra_expr::query::store::InMemoryStore;
use sombra_expr::query::{Document, EvalContext, Expr, ExprRewriter, ParameterResolver, Value};
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

fn cars() -> Vec<Value> {
    [("tempo", 250), ("fiesta", 160), ("no-name", 260), ("supreme", 310)]
        .into_iter()
        .enumerate()
        .map(|(pos, (name, size))| {
            Value::from(
                Document::new("Car")
                    .with_id(RecordId::new(8, pos as i64))
                    .with_field("name", name)
                    .with_field("size", size),
            )
        })
        .collect()
}

fn names(ctx: &EvalContext<'_>, expr: &Expr, records: &[Value]) -> Vec<String> {
    records
        .iter()
        .filter(|record| expr.matches(ctx, record))
        .filter_map(|record| record.as_document()?.field("name")?.as_str().map(str::to_owned))
        .collect()
}

#[test]
fn between_is_inclusive_range() {
    init_tracing();
    let ctx = EvalContext::new();
    let expr = Expr::between(Expr::field("size"), Expr::literal(150), Expr::literal(200));
    assert_eq!(names(&ctx, &expr, &cars()), vec!["fiesta"]);
    let edge = Expr::between(Expr::field("size"), Expr::literal(160), Expr::literal(250));
    assert_eq!(names(&ctx, &edge, &cars()), vec!["tempo", "fiesta"]);
}

#[test]
fn in_list_and_record_ids() {
    init_tracing();
    let ctx = EvalContext::new();
    let by_name = Expr::is_in(
        Expr::field("name"),
        Expr::collection(vec![Expr::literal("tempo"), Expr::literal("fiesta")]),
    );
    assert_eq!(names(&ctx, &by_name, &cars()), vec!["tempo", "fiesta"]);

    let by_rid = Expr::is_in(
        Expr::reflect(Reflect::Id),
        Expr::collection(vec![Expr::literal(RecordId::new(8, 1))]),
    );
    assert_eq!(names(&ctx, &by_rid, &cars()), vec!["fiesta"]);

    let by_text = Expr::eq(Expr::reflect(Reflect::Id), Expr::literal("#8:3"));
    assert_eq!(names(&ctx, &by_text, &cars()), vec!["supreme"]);
}

#[test]
fn numeric_kinds_compare_by_value() {
    init_tracing();
    let ctx = EvalContext::new();
    let boat = Value::from(Document::new("Boat").with_field("size", 1.3f32));
    assert!(Expr::eq(Expr::field("size"), Expr::literal(1.3f64)).matches(&ctx, &boat));
    let wide = Value::from(Document::new("Boat").with_field("size", 160i64));
    assert!(Expr::eq(Expr::field("size"), Expr::literal(160)).matches(&ctx, &wide));
    assert!(Expr::lt(Expr::field("size"), Expr::literal(160.5)).matches(&ctx, &wide));
}

#[test]
fn arithmetic_in_projections() {
    init_tracing();
    let ctx = EvalContext::new();
    let cars = cars();
    let tempo = &cars[0];
    let grown = Expr::arith(ArithOp::Plus, Expr::field("size"), Expr::literal(5));
    assert_eq!(grown.evaluate(&ctx, tempo), Value::Int(255));
    let ratio = Expr::arith(ArithOp::Divide, Expr::field("size"), Expr::literal(2.0));
    assert_eq!(ratio.evaluate(&ctx, tempo), Value::Double(125.0));
    let label = Expr::arith(ArithOp::Plus, Expr::field("name"), Expr::literal("!"));
    assert_eq!(label.evaluate(&ctx, tempo), Value::from("tempo!"));
}

#[test]
fn filtered_path_into_embedded_list() {
    init_tracing();
    let ctx = EvalContext::new();
    let dock = |name: &str, capacity: i32| {
        Value::from(
            Document::embedded()
                .with_field("name", name)
                .with_field("capacity", capacity),
        )
    };
    let port = Value::from(
        Document::new("Port").with_field(
            "docks",
            Value::List(vec![dock("alger", 12), dock("oran", 7)]),
        ),
    );
    let alger = Expr::path(
        Expr::filtered(
            Expr::field("docks"),
            vec![Expr::eq(Expr::field("name"), Expr::literal("alger"))],
        ),
        Expr::field("capacity"),
    );
    assert_eq!(alger.evaluate(&ctx, &port), Value::Int(12));
    assert!(Expr::eq(alger, Expr::literal(12)).matches(&ctx, &port));

    let all = Expr::field_path(["docks", "capacity"]).unwrap();
    assert_eq!(
        all.evaluate(&ctx, &port),
        Value::List(vec![Value::Int(12), Value::Int(7)])
    );
}

#[test]
fn chained_brackets_filter_then_project() {
    init_tracing();
    let ctx = EvalContext::new();
    let boat = |freight: &str| {
        Document::embedded().with_field("freight", Document::embedded().with_field("name", freight))
    };
    let sea = Value::from(Document::new("Sea").with_field(
        "docks",
        Value::List(vec![
            Value::from(Document::new("dock").with_field("name", "alger").with_field("boat", boat("thon"))),
            Value::from(Document::new("pier").with_field("name", "oran").with_field("boat", boat("sardine"))),
        ]),
    ));
    let docks = Expr::filtered(
        Expr::field("docks"),
        vec![Expr::eq(Expr::reflect(Reflect::Class), Expr::literal("dock"))],
    );
    let freight = Expr::filtered(
        docks,
        vec![Expr::field_path(["boat", "freight", "name"]).unwrap()],
    );
    assert_eq!(freight.evaluate(&ctx, &sea), Value::from("thon"));
    assert!(Expr::eq(freight.clone(), Expr::literal("thon")).matches(&ctx, &sea));
    assert!(!Expr::eq(freight, Expr::literal("sardine")).matches(&ctx, &sea));

    let every = Expr::filtered(
        Expr::field("docks"),
        vec![Expr::field_path(["boat", "freight", "name"]).unwrap()],
    );
    assert_eq!(
        every.evaluate(&ctx, &sea),
        Value::List(vec![Value::from("thon"), Value::from("sardine")])
    );
}

#[test]
fn nested_paths_are_equivalent() {
    init_tracing();
    let ctx = EvalContext::new();
    let person = Value::from(Document::new("Person").with_field(
        "address",
        Document::embedded().with_field("city", Document::embedded().with_field("name", "Rome")),
    ));
    let left = Expr::path(
        Expr::path(Expr::field("address"), Expr::field("city")),
        Expr::field("name"),
    );
    let right = Expr::path(
        Expr::field("address"),
        Expr::path(Expr::field("city"), Expr::field("name")),
    );
    assert_eq!(left.evaluate(&ctx, &person), Value::from("Rome"));
    assert_eq!(left.evaluate(&ctx, &person), right.evaluate(&ctx, &person));
}

#[test]
fn dates_compare_with_resolved_parameters() {
    init_tracing();
    let ctx = EvalContext::new();
    let people: Vec<Value> = [("ann", "1980-05-01"), ("bob", "1995-11-20")]
        .into_iter()
        .map(|(name, born)| {
            let ms = sombra_expr::query::temporal::parse_date(born).unwrap();
            Value::from(
                Document::new("Person")
                    .with_field("name", name)
                    .with_field("birthday", Value::Date(ms)),
            )
        })
        .collect();
    let parsed = Expr::gt(Expr::field("birthday"), Expr::positional(0));
    let mut resolver = ParameterResolver::positional([Value::from("1990-01-01")]);
    let bound = resolver.rewrite(&parsed).unwrap();
    assert_eq!(names(&ctx, &bound, &people), vec!["bob"]);
    assert!(names(&ctx, &parsed, &people).is_empty());
}

#[test]
fn links_and_class_hierarchy() {
    init_tracing();
    let mut store = InMemoryStore::new()
        .with_class("V", None)
        .with_class("Vehicle", Some("V"))
        .with_class("Car", Some("Vehicle"));
    for car in cars() {
        store.insert(car.as_document().unwrap().clone()).unwrap();
    }
    let ctx = EvalContext::new().with_store(&store);
    let owner = Value::from(
        Document::new("Person")
            .with_field("name", "luca")
            .with_field("car", RecordId::new(8, 3)),
    );
    let size = Expr::field_path(["car", "size"]).unwrap();
    assert_eq!(size.evaluate(&ctx, &owner), Value::Int(310));
    assert!(Expr::instance_of(Expr::field("car"), Expr::field("V")).matches(&ctx, &owner));
    assert!(!Expr::instance_of(Expr::field("car"), Expr::literal("Person")).matches(&ctx, &owner));
    let scanned = store.candidates("Vehicle");
    assert_eq!(scanned.len(), 4);
}

#[test]
fn null_candidate_never_panics() {
    init_tracing();
    let ctx = EvalContext::new();
    let exprs = [
        Expr::eq(Expr::field("name"), Expr::literal("x")),
        Expr::between(Expr::field("size"), Expr::literal(1), Expr::literal(2)),
        Expr::is_in(Expr::field("name"), Expr::collection(vec![Expr::literal(1)])),
        Expr::arith(ArithOp::Modulo, Expr::field("size"), Expr::literal(0)),
        Expr::method(Expr::field("name"), "toUpperCase", vec![]),
        Expr::function("ifnull", vec![Expr::field("name"), Expr::literal("?")]),
        Expr::filtered(Expr::field("docks"), vec![Expr::literal(1), Expr::literal(3)]),
    ];
    for expr in &exprs {
        let _ = expr.evaluate(&ctx, &Value::Null);
    }
    assert_eq!(exprs[5].evaluate(&ctx, &Value::Null), Value::from("?"));
    assert!(Expr::is_null(Expr::field("name")).matches(&ctx, &Value::Null));
}
