use crate::CompiledRule;
use serde_json::json;
use std::collections::BTreeMap;
use twin_types::{CompiledTql, Node, TqlError};

fn input(pairs: &[(&str, Node)]) -> BTreeMap<String, Node> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_exec_copies_property() {
    let rule = CompiledRule::new("insert into device123 select device234.temp as temp").unwrap();
    let out = rule.exec(&input(&[("device234.temp", json!(50))])).unwrap();
    assert_eq!(out.get("temp"), Some(&json!(50)));
    assert_eq!(out.len(), 1);
}

#[test]
fn test_exec_arithmetic() {
    let rule = CompiledRule::new(
        "insert into t select a.x + b.y as sum, a.x / 2 as half, a.x / 4 as quarter, -a.x as neg, 'id-' + a.name as label",
    )
    .unwrap();
    let out = rule
        .exec(&input(&[
            ("a.x", json!(10)),
            ("b.y", json!(1.5)),
            ("a.name", json!("7")),
        ]))
        .unwrap();
    assert_eq!(out["sum"], json!(11.5));
    assert_eq!(out["half"], json!(5));
    assert_eq!(out["quarter"], json!(2.5));
    assert_eq!(out["neg"], json!(-10));
    assert_eq!(out["label"], json!("id-7"));
}

#[test]
fn test_missing_input_skips_projection() {
    let rule = CompiledRule::new("insert into t select a.x as x, a.y + 1 as y").unwrap();
    let out = rule.exec(&input(&[("a.x", json!(true))])).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out["x"], json!(true));
}

#[test]
fn test_wildcard_input() {
    let rule = CompiledRule::new("insert into t select a.*, a.metrics.temp as t").unwrap();
    let out = rule
        .exec(&input(&[("a.*", json!({"metrics": {"temp": 21}, "on": true}))]))
        .unwrap();
    assert_eq!(out["on"], json!(true));
    assert_eq!(out["metrics"], json!({"temp": 21}));
    assert_eq!(out["t"], json!(21));
}

#[test]
fn test_eval_errors() {
    let rule = CompiledRule::new("insert into t select a.x / 0 as x").unwrap();
    assert!(matches!(
        rule.exec(&input(&[("a.x", json!(3))])),
        Err(TqlError::Eval(_))
    ));

    let rule = CompiledRule::new("insert into t select a.x * 2 as x").unwrap();
    assert!(matches!(
        rule.exec(&input(&[("a.x", json!("hot"))])),
        Err(TqlError::Eval(_))
    ));
}

#[test]
fn test_integer_overflow_is_an_error() {
    let cases = [
        ("insert into t select s.x / s.y as z", json!(i64::MIN), json!(-1)),
        ("insert into t select s.x + s.y as z", json!(i64::MAX), json!(1)),
        ("insert into t select s.x * s.y as z", json!(i64::MIN), json!(-1)),
        ("insert into t select -s.x as z", json!(i64::MIN), json!(0)),
    ];
    for (tql, x, y) in cases {
        let rule = CompiledRule::new(tql).unwrap();
        let result = rule.exec(&input(&[("s.x", x), ("s.y", y)]));
        assert!(matches!(result, Err(TqlError::Eval(_))), "{tql}: {result:?}");
    }

    // an inexact quotient falls back to floating point
    let rule = CompiledRule::new("insert into t select s.x / s.y as z").unwrap();
    let out = rule
        .exec(&input(&[("s.x", json!(i64::MIN)), ("s.y", json!(-3))]))
        .unwrap();
    assert!(out["z"].is_f64());
}
