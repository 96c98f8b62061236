//! # Twin rule language
//!
//! A small compiler for reactive property rules of the form
//!
//! ```text
//! insert into device123 select device234.temp as temp, device234.hum * 100 as hum_pct
//! ```
//!
//! A compiled rule knows its target entity, the entities and property keys it
//! reads, and how to turn a snapshot of those inputs into output properties.
//! The runtime consumes it only through the [`twin_types::tql`] traits.
//!
//! ## Grammar
//!
//! ```text
//! rule       := "insert" "into" IDENT "select" projection ("," projection)*
//! projection := IDENT "." "*" | expr ["as" alias]
//! expr       := term (("+" | "-") term)*
//! term       := unary (("*" | "/") unary)*
//! unary      := "-" unary | primary
//! primary    := INT | FLOAT | STRING | "true" | "false" | "null" | "(" expr ")" | property
//! property   := IDENT "." IDENT ("." IDENT | "[" INT "]")*
//! ```
//!
//! Identifiers may contain `-`, so subtraction needs surrounding spaces.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use twin_types::{CompiledTql, Node, TentacleConfig, TqlCompiler, TqlError, WILDCARD};

pub use ast::{BinOp, Expr, Projection, PropertyRef, Rule};
pub use lexer::{tokenize, SpannedToken, Token};
pub use parser::{parse, Parser};

/// Compiler handed to the runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TqlEngine;

impl TqlCompiler for TqlEngine {
    fn compile(&self, text: &str) -> Result<Arc<dyn CompiledTql>, TqlError> {
        Ok(Arc::new(CompiledRule::new(text)?))
    }
}

/// A parsed rule together with its derived watch lists
#[derive(Debug, Clone)]
pub struct CompiledRule {
    text: String,
    rule: Rule,
    tentacles: Vec<TentacleConfig>,
}

impl CompiledRule {
    pub fn new(text: &str) -> Result<Self, TqlError> {
        let rule = parse(text)?;
        let tentacles = collect_tentacles(&rule);
        Ok(Self {
            text: text.to_string(),
            rule,
            tentacles,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Serializable view used by tooling
    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            target: self.rule.target.clone(),
            sources: self.sources(),
            tentacles: self
                .tentacles
                .iter()
                .map(|t| (t.source_entity.clone(), t.property_keys.clone()))
                .collect(),
        }
    }
}

/// Target, sources and watched keys of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub target: String,
    pub sources: Vec<String>,
    pub tentacles: BTreeMap<String, Vec<String>>,
}

fn collect_tentacles(rule: &Rule) -> Vec<TentacleConfig> {
    let mut tentacles: Vec<TentacleConfig> = Vec::new();
    let mut add = |entity: &str, key: &str| {
        let idx = match tentacles.iter().position(|t| t.source_entity == entity) {
            Some(idx) => idx,
            None => {
                tentacles.push(TentacleConfig {
                    source_entity: entity.to_string(),
                    property_keys: Vec::new(),
                });
                tentacles.len() - 1
            }
        };
        let keys = &mut tentacles[idx].property_keys;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    };

    for projection in &rule.projections {
        match projection {
            Projection::Wildcard { entity } => add(entity, WILDCARD),
            Projection::Expr { expr, .. } => {
                let mut refs = Vec::new();
                expr.references(&mut refs);
                for r in refs {
                    add(&r.entity, &r.path);
                }
            }
        }
    }

    tentacles
}

impl CompiledTql for CompiledRule {
    fn text(&self) -> &str {
        &self.text
    }

    fn target(&self) -> &str {
        &self.rule.target
    }

    fn sources(&self) -> Vec<String> {
        self.tentacles
            .iter()
            .map(|t| t.source_entity.clone())
            .collect()
    }

    fn tentacles(&self) -> Vec<TentacleConfig> {
        self.tentacles.clone()
    }

    fn exec(&self, input: &BTreeMap<String, Node>) -> Result<BTreeMap<String, Node>, TqlError> {
        eval::execute(&self.rule, input)
    }
}
