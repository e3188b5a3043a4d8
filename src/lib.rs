#![forbid(unsafe_code)]

//! Container Quota Sentinel (cqs): logon-time size warnings for per-user
//! virtual-disk containers.
//!
//! Each run:
//! 1. **Cooldown gate** decides whether the user may be notified again yet
//! 2. **Container resolver** maps letterless volumes to the Profile and Office data containers
//! 3. **Threshold evaluator** classifies usage against the policy maximum
//!
//! and a notice goes out through the first notification backend that works.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use container_quota_sentinel::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use container_quota_sentinel::core::config::Config;
//! use container_quota_sentinel::monitor::resolver::ContainerResolver;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod monitor;
pub mod notify;
pub mod platform;
