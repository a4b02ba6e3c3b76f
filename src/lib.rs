//! Predicate and expression core of the Sombra document engine.
//!
//! Expression trees are evaluated per record with cross-type comparison
//! semantics, and leaf comparisons over indexed classes are answered from
//! index lookups before a scan begins.

#![warn(missing_docs)]

pub mod config;
pub mod query;
pub mod types;
