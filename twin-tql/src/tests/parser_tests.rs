use crate::ast::*;
use crate::parser::parse;
use crate::{CompiledRule, TqlEngine};
use serde_json::json;
use twin_types::{TqlCompiler, TqlError};

#[test]
fn test_parse_simple_rule() {
    let rule = parse("insert into device123 select device234.temp as temp").unwrap();
    assert_eq!(rule.target, "device123");
    assert_eq!(
        rule.projections,
        vec![Projection::Expr {
            expr: Expr::Property(PropertyRef {
                entity: "device234".into(),
                path: "temp".into(),
            }),
            alias: "temp".into(),
        }]
    );
}

#[test]
fn test_default_alias_is_property_path() {
    let rule = parse("insert into t select s.metrics.temp").unwrap();
    match &rule.projections[0] {
        Projection::Expr { alias, .. } => assert_eq!(alias, "metrics.temp"),
        other => panic!("unexpected projection {:?}", other),
    }
}

#[test]
fn test_precedence() {
    let rule = parse("insert into t select 1 + 2 * 3 as x").unwrap();
    let Projection::Expr { expr, .. } = &rule.projections[0] else {
        panic!("expected expression");
    };
    assert_eq!(
        *expr,
        Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Literal(json!(1))),
            Box::new(Expr::Binary(
                BinOp::Mul,
                Box::new(Expr::Literal(json!(2))),
                Box::new(Expr::Literal(json!(3))),
            )),
        )
    );
}

#[test]
fn test_wildcard_and_index_paths() {
    let rule = parse("insert into t select a.*, b.items[2].name as first").unwrap();
    assert_eq!(rule.projections[0], Projection::Wildcard { entity: "a".into() });
    let Projection::Expr { expr, alias } = &rule.projections[1] else {
        panic!("expected expression");
    };
    assert_eq!(alias, "first");
    assert_eq!(
        *expr,
        Expr::Property(PropertyRef {
            entity: "b".into(),
            path: "items[2].name".into(),
        })
    );
}

#[test]
fn test_parse_errors() {
    assert!(matches!(parse("select a.b"), Err(TqlError::Parse { .. })));
    assert!(matches!(parse("insert into t select a"), Err(TqlError::Parse { .. })));
    assert!(matches!(parse("insert into t select a.b + 1"), Err(TqlError::Parse { .. })));
    assert!(matches!(parse("insert into t select a.b as c extra"), Err(TqlError::Parse { .. })));
    assert!(matches!(parse("insert into t select (a.b as c"), Err(TqlError::Parse { .. })));
}

#[test]
fn test_tentacles_group_by_source() {
    let rule = CompiledRule::new(
        "insert into t select a.x + b.y as s, a.x * 2 as d, a.z as z, b.*",
    )
    .unwrap();
    let summary = rule.summary();
    assert_eq!(summary.sources, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(summary.tentacles["a"], vec!["x".to_string(), "z".to_string()]);
    assert_eq!(summary.tentacles["b"], vec!["y".to_string(), "*".to_string()]);
}

#[test]
fn test_summary_snapshot() {
    let rule = CompiledRule::new("insert into device123 select device234.temp as temp").unwrap();
    insta::assert_snapshot!(
        serde_json::to_string(&rule.summary()).unwrap(),
        @r#"{"target":"device123","sources":["device234"],"tentacles":{"device234":["temp"]}}"#
    );
}

#[test]
fn test_engine_compiles_through_trait() {
    let compiled = TqlEngine.compile("insert into x select y.v as v").unwrap();
    assert_eq!(compiled.target(), "x");
    assert_eq!(compiled.sources(), vec!["y".to_string()]);
    assert_eq!(compiled.text(), "insert into x select y.v as v");
    assert!(TqlEngine.compile("insert x").is_err());
}
