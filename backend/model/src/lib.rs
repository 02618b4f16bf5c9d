//! Database models for Kiln backend.
//!
//! ## Status Columns
//! Status enums are stored as small integers. Unknown values decode to a
//! terminal state, so that no job runner ever acts on a row it does not
//! understand.

pub mod bus;
pub mod db;
pub mod job;
