//! Resource portal HTTP server

pub mod api;
pub mod config;
