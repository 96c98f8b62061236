use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a patch operator name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperatorError {
    #[error("Patch operator invalid: {0}")]
    Invalid(String),

    #[error("Patch operator reserved: {0}")]
    Reserved(String),
}

/// Property patch operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PatchOperator {
    /// Overwrite or create the path
    #[default]
    Replace,
    /// Append to the array at the path
    Add,
    /// Delete the path
    Remove,
    /// Read the path without mutating
    Copy,
    /// Deep-merge an object onto the path
    Merge,
}

impl PatchOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOperator::Replace => "replace",
            PatchOperator::Add => "add",
            PatchOperator::Remove => "remove",
            PatchOperator::Copy => "copy",
            PatchOperator::Merge => "merge",
        }
    }

    /// Whether applying the operator changes the document
    pub fn is_mutating(&self) -> bool {
        !matches!(self, PatchOperator::Copy)
    }
}

impl FromStr for PatchOperator {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(PatchOperator::Replace),
            "add" => Ok(PatchOperator::Add),
            "remove" => Ok(PatchOperator::Remove),
            "copy" => Ok(PatchOperator::Copy),
            "merge" => Ok(PatchOperator::Merge),
            "test" | "move" => Err(OperatorError::Reserved(s.to_string())),
            other => Err(OperatorError::Invalid(other.to_string())),
        }
    }
}

impl TryFrom<String> for PatchOperator {
    type Error = OperatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PatchOperator> for String {
    fn from(op: PatchOperator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for PatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
