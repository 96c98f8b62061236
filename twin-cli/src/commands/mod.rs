//! CLI command implementations.

pub mod compile;
pub mod run;

pub use compile::compile_rule;
pub use run::{run_node, RunOptions};
