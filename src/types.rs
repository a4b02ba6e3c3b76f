#![forbid(unsafe_code)]

//! Identifier and error types shared by every layer of the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable reference to a stored record: a cluster plus a position inside it.
///
/// The textual form is `#<cluster>:<position>`; the leading `#` is optional when
/// parsing.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RecordId {
    /// Cluster the record lives in.
    pub cluster: i16,
    /// Position of the record inside its cluster.
    pub position: i64,
}

impl RecordId {
    /// Creates a record identifier from its parts.
    pub const fn new(cluster: i16, position: i64) -> Self {
        Self { cluster, position }
    }

    /// Parses `#c:p` or `c:p`, returning `None` on any malformed input.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('#').unwrap_or(text);
        let (cluster, position) = body.split_once(':')?;
        let cluster = cluster.parse::<i16>().ok()?;
        let position = position.parse::<i64>().ok()?;
        Some(Self { cluster, position })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

impl FromStr for RecordId {
    type Err = SombraError;

    fn from_str(s: &str) -> Result<Self> {
        RecordId::parse(s).ok_or_else(|| SombraError::Parse(format!("invalid record id '{s}'")))
    }
}

/// Errors surfaced by the expression core.
///
/// Evaluation itself never fails; these errors come from preparation
/// (binding, parameter resolution) and from index key construction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SombraError {
    /// A literal could not be parsed into the structured value a context demanded.
    #[error("parse error: {0}")]
    Parse(String),
    /// Function name has no registered implementation.
    #[error("no function for name '{name}'")]
    UnknownFunction {
        /// Name as written in the expression.
        name: String,
    },
    /// Method name has no registered implementation.
    #[error("no method for name '{name}'")]
    UnknownMethod {
        /// Name as written in the expression.
        name: String,
    },
    /// Call site supplied an argument count outside the accepted range.
    #[error("{name}() expects between {min} and {max} arguments (got {actual})")]
    ArgumentCount {
        /// Function or method name.
        name: String,
        /// Minimum accepted arguments.
        min: usize,
        /// Maximum accepted arguments.
        max: usize,
        /// Arguments supplied.
        actual: usize,
    },
    /// A placeholder had no argument bound to it.
    #[error("no argument bound for parameter {0}")]
    UnboundParameter(String),
    /// Structurally invalid input.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl SombraError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            SombraError::Parse(_) => "ParseError",
            SombraError::UnknownFunction { .. } => "UnknownFunction",
            SombraError::UnknownMethod { .. } => "UnknownMethod",
            SombraError::ArgumentCount { .. } => "ArgumentCount",
            SombraError::UnboundParameter(_) => "UnboundParameter",
            SombraError::Invalid(_) => "Invalid",
        }
    }

    /// Whether the error must abort command preparation rather than degrade a
    /// single optimization.
    pub fn is_preparation_error(&self) -> bool {
        !matches!(self, SombraError::Parse(_))
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SombraError>;
