//! Host integration: policy lookup, volume enumeration, external commands.

pub mod command;
pub mod policy;
pub mod volumes;
