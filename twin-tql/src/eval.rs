use serde_json::{json, Number, Value};
use std::collections::BTreeMap;
use twin_types::{Node, TqlError, WatchKey};

use crate::ast::{BinOp, Expr, Projection, PropertyRef, Rule};

/// Evaluate every projection of `rule` against `input`.
///
/// Input keys are watch-key strings (`entity.path` or `entity.*`).
/// Projections whose inputs are missing are left out of the output.
pub fn execute(
    rule: &Rule,
    input: &BTreeMap<String, Node>,
) -> Result<BTreeMap<String, Node>, TqlError> {
    let mut output = BTreeMap::new();

    for projection in &rule.projections {
        match projection {
            Projection::Wildcard { entity } => {
                if let Some(Value::Object(doc)) = input.get(&WatchKey::wildcard(entity.as_str()).to_string()) {
                    for (key, value) in doc {
                        output.insert(key.clone(), value.clone());
                    }
                }
            }
            Projection::Expr { expr, alias } => {
                if let Some(value) = eval(expr, input)? {
                    output.insert(alias.clone(), value);
                }
            }
        }
    }

    Ok(output)
}

/// `None` means a referenced input is missing.
fn eval(expr: &Expr, input: &BTreeMap<String, Node>) -> Result<Option<Node>, TqlError> {
    match expr {
        Expr::Literal(v) => Ok(Some(v.clone())),
        Expr::Property(r) => Ok(lookup(r, input)),
        Expr::Neg(inner) => match eval(inner, input)? {
            None => Ok(None),
            Some(v) => negate(&v).map(Some),
        },
        Expr::Binary(op, lhs, rhs) => {
            let (Some(l), Some(r)) = (eval(lhs, input)?, eval(rhs, input)?) else {
                return Ok(None);
            };
            binary(*op, &l, &r).map(Some)
        }
    }
}

fn lookup(r: &PropertyRef, input: &BTreeMap<String, Node>) -> Option<Node> {
    if let Some(v) = input.get(&r.to_string()) {
        return Some(v.clone());
    }

    // Fall back to a whole-document input for the entity.
    let doc = input.get(&WatchKey::wildcard(r.entity.as_str()).to_string())?;
    let mut current = doc;
    for segment in split_path(&r.path) {
        current = match segment {
            Segment::Key(key) => current.get(key)?,
            Segment::Index(i) => current.get(i)?,
        };
    }
    Some(current.clone())
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn split_path(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }
        for index in rest.split(['[', ']']).filter(|s| !s.is_empty()) {
            if let Ok(i) = index.parse() {
                segments.push(Segment::Index(i));
            }
        }
    }
    segments
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: &Value) -> Option<Num> {
    let n = v.as_number()?;
    match n.as_i64() {
        Some(i) => Some(Num::Int(i)),
        None => n.as_f64().map(Num::Float),
    }
}

fn float(f: f64) -> Result<Node, TqlError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| TqlError::Eval(format!("non-finite result {}", f)))
}

fn negate(v: &Value) -> Result<Node, TqlError> {
    match as_num(v) {
        Some(Num::Int(i)) => i
            .checked_neg()
            .map(|n| json!(n))
            .ok_or_else(|| TqlError::Eval(format!("integer overflow negating {}", i))),
        Some(Num::Float(f)) => float(-f),
        None => Err(TqlError::Eval(format!("cannot negate {}", v))),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Node, TqlError> {
    if let (BinOp::Add, Value::String(a), Value::String(b)) = (op, l, r) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    let (Some(a), Some(b)) = (as_num(l), as_num(r)) else {
        return Err(TqlError::Eval(format!("cannot apply {:?} to {} and {}", op, l, r)));
    };

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_op(op, a, b),
        (a, b) => {
            let (a, b) = (to_f64(a), to_f64(b));
            match op {
                BinOp::Add => float(a + b),
                BinOp::Sub => float(a - b),
                BinOp::Mul => float(a * b),
                BinOp::Div if b == 0.0 => Err(TqlError::Eval("division by zero".into())),
                BinOp::Div => float(a / b),
            }
        }
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Node, TqlError> {
    let checked = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(TqlError::Eval("division by zero".into()));
            }
            match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                Some(_) => return float(a as f64 / b as f64),
                None => None,
            }
        }
    };
    checked
        .map(|v| json!(v))
        .ok_or_else(|| TqlError::Eval(format!("integer overflow in {:?}", op)))
}
