//! Queries over the persistent records.
//!
//! Every function runs on a caller-provided connection, so callers decide
//! which calls share a transaction.

pub mod batch;
pub mod build;
pub mod import;
pub mod package;
