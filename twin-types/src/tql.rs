//! Seam between the runtime and the rule language
//!
//! The runtime never looks inside rule text. It hands the text to a
//! [`TqlCompiler`] and works only with the resulting [`CompiledTql`]:
//! which entity it writes to, which entities it reads from, which
//! properties must be watched, and how inputs map to outputs.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

use crate::Node;

/// Errors from compiling or executing a rule
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TqlError {
    #[error("Lexer error at {offset}: {message}")]
    Lex { offset: usize, message: String },

    #[error("Parser error at {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Evaluation error: {0}")]
    Eval(String),
}

/// Properties one rule reads from one source entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TentacleConfig {
    pub source_entity: String,
    pub property_keys: Vec<String>,
}

/// A compiled rule
pub trait CompiledTql: Send + Sync + Debug {
    /// Original rule text
    fn text(&self) -> &str;

    /// Entity receiving the outputs
    fn target(&self) -> &str;

    /// Entities read by the rule, in first-appearance order
    fn sources(&self) -> Vec<String>;

    /// Per-source property keys that must be watched
    fn tentacles(&self) -> Vec<TentacleConfig>;

    /// Map `watchkey string -> value` inputs to `output path -> value`.
    fn exec(&self, input: &BTreeMap<String, Node>) -> Result<BTreeMap<String, Node>, TqlError>;
}

/// Turns rule text into a [`CompiledTql`]
pub trait TqlCompiler: Send + Sync {
    fn compile(&self, text: &str) -> Result<Arc<dyn CompiledTql>, TqlError>;
}
