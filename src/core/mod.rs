//! Core types: errors, configuration, the shared provider fallback chain.

pub mod config;
pub mod errors;
pub mod fallback;
