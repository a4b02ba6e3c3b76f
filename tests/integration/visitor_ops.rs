#![allow(missing_docs)]

use std::ops::RangeInclusive;

use sombra_expr::query::expr::{ArithOp, Param};
use sombra_expr::query::index::{InMemoryCatalog, InMemoryIndex};
use sombra_expr::query::{
    Binder, Document, EvalContext, Expr, ExprKind, ExprRewriter, FunctionRegistry, IndexKind,
    KeyType, ParameterResolver, QuerySource, SearchContext, SearchPlan, Simplifier, SqlFunction,
    SqlMethod, Value,
};
use sombra_expr::types::{RecordId, SombraError};

fn predicate() -> Expr {
    Expr::and(vec![
        Expr::gt(Expr::field("size"), Expr::positional(0)),
        Expr::or(vec![
            Expr::eq(Expr::field("name"), Expr::named("name")),
            Expr::like(Expr::field("name"), Expr::literal("sup%")),
        ]),
    ])
}

/// Counts non-null arguments; registered as an aggregate.
struct CountFn;

impl SqlFunction for CountFn {
    fn name(&self) -> &str {
        "count"
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn is_aggregation(&self) -> bool {
        true
    }

    fn call(&self, ctx: &EvalContext<'_>, candidate: &Value, args: &[Expr]) -> Value {
        let present = args.iter().filter(|arg| !arg.evaluate(ctx, candidate).is_null());
        Value::Long(present.count() as i64)
    }
}

/// Appends an exclamation mark to a string receiver.
struct Shout;

impl SqlMethod for Shout {
    fn name(&self) -> &str {
        "shout"
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
        receiver
            .as_str()
            .map_or(Value::Null, |text| Value::String(format!("{text}!")))
    }
}

#[test]
fn resolution_is_pure_and_repeatable() {
    let parsed = predicate();
    let snapshot = parsed.copy();
    assert_eq!(
        parsed.parameters(),
        vec![Param::Positional(0), Param::Named("name".into())]
    );

    let ctx = EvalContext::new();
    let tempo = Value::from(Document::new("Car").with_field("name", "tempo").with_field("size", 250));
    for (min, name, expected) in [(200, "tempo", true), (300, "tempo", false), (100, "fiesta", false)] {
        let mut resolver = ParameterResolver::positional([Value::Int(min)]).with_named("name", name);
        let bound = resolver.rewrite(&parsed).unwrap();
        assert!(bound.parameters().is_empty());
        assert_eq!(bound.matches(&ctx, &tempo), expected, "min={min} name={name}");
    }
    assert_eq!(parsed, snapshot);

    let mut partial = ParameterResolver::positional([Value::Int(1)]);
    assert_eq!(
        partial.rewrite(&parsed),
        Err(SombraError::UnboundParameter(":name".into()))
    );
}

#[test]
fn binder_marks_aggregates_and_rejects_unknown_calls() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_function(CountFn);
    let mut binder = Binder::new(&registry);

    let projection = Expr::arith(
        ArithOp::Plus,
        Expr::function("COUNT", vec![Expr::field("name")]),
        Expr::literal(1),
    );
    assert!(!projection.contains_aggregation());
    let bound = projection.rewrite(&mut binder).unwrap();
    assert!(bound.contains_aggregation());
    assert!(!bound.is_aggregation());

    let nested = Expr::method(
        Expr::field("name"),
        "charAt",
        vec![Expr::function("missing", vec![])],
    );
    let err = nested.rewrite(&mut binder).unwrap_err();
    assert_eq!(err, SombraError::UnknownFunction { name: "missing".into() });
    assert!(err.is_preparation_error());

    let wrong = Expr::method(Expr::field("name"), "charAt", vec![]);
    assert_eq!(wrong.rewrite(&mut binder).unwrap_err().code(), "ArgumentCount");
}

#[test]
fn simplified_trees_evaluate_the_same() {
    let ctx = EvalContext::new();
    let records: Vec<Value> = [("tempo", 250), ("fiesta", 160), ("supreme", 310)]
        .into_iter()
        .map(|(name, size)| Value::from(Document::new("Car").with_field("name", name).with_field("size", size)))
        .collect();
    let exprs = [
        Expr::and(vec![
            Expr::include(),
            Expr::gt(
                Expr::field("size"),
                Expr::arith(ArithOp::Multiply, Expr::literal(100), Expr::literal(2)),
            ),
            Expr::and(vec![Expr::not(Expr::not(Expr::like(
                Expr::field("name"),
                Expr::literal("%e%"),
            )))]),
        ]),
        Expr::or(vec![
            Expr::eq(Expr::literal(1), Expr::literal(2)),
            Expr::is_in(
                Expr::field("name"),
                Expr::collection(vec![Expr::literal("fiesta"), Expr::literal("supreme")]),
            ),
        ]),
        Expr::not(Expr::between(Expr::literal(5), Expr::literal(1), Expr::literal(9))),
    ];
    for expr in &exprs {
        let simplified = expr.rewrite(&mut Simplifier).unwrap();
        for record in &records {
            assert_eq!(
                expr.matches(&ctx, record),
                simplified.matches(&ctx, record),
                "{expr}\n=>\n{simplified}"
            );
        }
    }
    assert_eq!(exprs[2].simplify().kind, ExprKind::Exclude);
}

#[test]
fn simplifier_leaves_registered_methods_to_the_executing_context() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_method(Shout);
    let ctx = EvalContext::new().with_functions(&registry);
    let greeting = Expr::method(Expr::literal("hi"), "shout", vec![]);
    let guarded = Expr::eq(greeting.clone(), Expr::literal("hi!"));
    for expr in [greeting, guarded] {
        let simplified = expr.simplify();
        assert_eq!(simplified, expr);
        assert_eq!(
            simplified.evaluate(&ctx, &Value::Null),
            expr.evaluate(&ctx, &Value::Null)
        );
    }
    assert_eq!(
        Expr::method(Expr::literal("hi"), "shout", vec![]).evaluate(&ctx, &Value::Null),
        Value::from("hi!")
    );
}

#[test]
fn simplified_sentinels_reach_the_search_pass() {
    let catalog = InMemoryCatalog::new().with_index(InMemoryIndex::new(
        "Car.name",
        "Car",
        &["name"],
        IndexKind::Unique,
        KeyType::String,
    ));
    let source = QuerySource::Class("Car".into());
    let ctx = SearchContext::new(&source, &catalog);
    let expr = Expr::or(vec![
        Expr::lt(Expr::literal(1), Expr::literal(2)),
        Expr::eq(Expr::field("name"), Expr::literal("tempo")),
    ])
    .simplify();
    assert_eq!(expr.kind, ExprKind::Include);
    let plan = SearchPlan::build(&expr, &ctx);
    let verdict = plan.result(&expr).map(|r| r.verdict(Some(RecordId::new(8, 0))));
    assert_eq!(verdict, Some(Some(true)));
}

#[test]
fn display_lists_every_node_once() {
    let expr = predicate().with_alias("picked");
    let text = expr.to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "And AS picked");
    assert_eq!(lines.len(), 10);
    assert!(lines.contains(&"│  └─ Parameter ?0"));
    assert!(lines.contains(&"      └─ Literal 'sup%'"));
    assert_eq!(expr.copy().to_string(), text);
}
