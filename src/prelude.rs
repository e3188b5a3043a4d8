//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use container_quota_sentinel::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{CqsError, Result};
pub use crate::core::fallback::{ChainOutcome, Provider, first_success};

// Monitor
pub use crate::monitor::container::{
    CandidateVolume, ContainerKind, ContainerPolicy, ResolvedAssignment,
};
pub use crate::monitor::cooldown::{
    CooldownGate, CooldownStore, FileCooldownStore, GateState, MemoryCooldownStore,
};
pub use crate::monitor::pipeline::{CheckOptions, LogonCheck, RunOutcome, RunReport, run_configured};
pub use crate::monitor::resolver::{ContainerResolver, MatchStrategy};
pub use crate::monitor::threshold::{Classification, ContainerStatus, Thresholds, evaluate};

// Platform
pub use crate::platform::policy::{PolicyProvider, PolicySource};
pub use crate::platform::volumes::{CandidateFilter, VolumeProvider, VolumeRecord, VolumeSource};

// Notifications
pub use crate::notify::{
    BackendChain, DeliveryReport, Notification, NotificationBackend, NotificationSeverity,
    NotificationSink,
};
