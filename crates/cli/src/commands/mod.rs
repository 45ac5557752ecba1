//! CLI command implementations

pub mod capacity;
pub mod fleet;
pub mod requests;
