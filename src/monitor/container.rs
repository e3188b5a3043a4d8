//! Container data model: kinds, policies, candidate volumes and the
//! volume-to-kind assignment produced by the resolver.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two container flavours a user can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// User profile container.
    Profile,
    /// Office data (ODFC) container.
    OfficeData,
}

impl ContainerKind {
    /// Every kind, Profile first. Positional matching relies on this order.
    pub const ALL: [Self; 2] = [Self::Profile, Self::OfficeData];

    /// Human-readable name used in notification text.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Profile => "Profile",
            Self::OfficeData => "Office data",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile => write!(f, "profile"),
            Self::OfficeData => write!(f, "office_data"),
        }
    }
}

/// Administrator policy for one container kind, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPolicy {
    pub kind: ContainerKind,
    pub enabled: bool,
    /// Configured ceiling; always > 0.
    pub max_size_mb: u64,
}

impl ContainerPolicy {
    #[must_use]
    pub const fn new(kind: ContainerKind, enabled: bool, max_size_mb: u64) -> Self {
        Self {
            kind,
            enabled,
            max_size_mb,
        }
    }

    #[must_use]
    pub const fn disabled(kind: ContainerKind) -> Self {
        Self::new(kind, false, crate::core::config::DEFAULT_MAX_SIZE_MB)
    }
}

/// A live volume that plausibly backs a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVolume {
    /// Opaque volume path or identifier.
    pub id: String,
    /// File system label; may be empty.
    pub label: String,
    pub used_mb: u64,
    pub total_mb: u64,
}

impl CandidateVolume {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, used_mb: u64, total_mb: u64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            used_mb,
            total_mb,
        }
    }
}

/// One volume claimed for a kind, with the rule that claimed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub volume: CandidateVolume,
    pub matched_by: &'static str,
}

/// At most one volume per kind; no volume appears twice.
///
/// Only the resolver constructs this; it is read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAssignment {
    profile: Option<Assignment>,
    office_data: Option<Assignment>,
    unclaimed: Vec<String>,
}

impl ResolvedAssignment {
    /// Volume assigned to `kind`, if any.
    #[must_use]
    pub fn volume(&self, kind: ContainerKind) -> Option<&CandidateVolume> {
        self.assignment(kind).map(|a| &a.volume)
    }

    /// Assignment (volume plus claiming rule) for `kind`, if any.
    #[must_use]
    pub const fn assignment(&self, kind: ContainerKind) -> Option<&Assignment> {
        match kind {
            ContainerKind::Profile => self.profile.as_ref(),
            ContainerKind::OfficeData => self.office_data.as_ref(),
        }
    }

    #[must_use]
    pub fn is_assigned(&self, kind: ContainerKind) -> bool {
        self.assignment(kind).is_some()
    }

    /// Ids of candidates no rule claimed, in source order.
    #[must_use]
    pub fn unclaimed(&self) -> &[String] {
        &self.unclaimed
    }

    /// Number of kinds that received a volume.
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        ContainerKind::ALL
            .iter()
            .filter(|kind| self.is_assigned(**kind))
            .count()
    }

    pub(crate) fn assign(&mut self, kind: ContainerKind, volume: CandidateVolume, matched_by: &'static str) {
        let slot = match kind {
            ContainerKind::Profile => &mut self.profile,
            ContainerKind::OfficeData => &mut self.office_data,
        };
        debug_assert!(slot.is_none(), "{kind} assigned twice");
        *slot = Some(Assignment { volume, matched_by });
    }

    pub(crate) fn leave_unclaimed(&mut self, volume: &CandidateVolume) {
        self.unclaimed.push(volume.id.clone());
    }
}
