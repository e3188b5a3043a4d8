//! Container resolver: decides which anonymous candidate volume backs which
//! container kind.
//!
//! Volumes carry no identity tag, so identity is inferred by a ranked chain of
//! match strategies. Strategies run in priority order; each one sweeps the
//! still-unclaimed candidates in the order the volume source returned them, so
//! a label claim always lands before any positional guess:
//!
//! 1. [`SizeRatioMatch`]: both kinds enabled with different maximums. A
//!    container volume is created at roughly its configured maximum, so the
//!    kind whose maximum is relatively closest to the volume size wins.
//! 2. [`LabelMatch`]: both kinds enabled; label patterns pick the kind.
//! 3. [`PositionalMatch`]: both kinds enabled; first free kind, Profile first.
//! 4. [`SingleKindMatch`]: one kind enabled; first free volume takes it.
//!
//! A single enabled kind facing a single candidate takes it without any check.
//! Candidates left once every enabled kind is filled stay unclaimed.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use regex::Regex;

use crate::core::config::ResolverConfig;
use crate::core::errors::Result;
use crate::monitor::container::{
    CandidateVolume, ContainerKind, ContainerPolicy, ResolvedAssignment,
};

/// Rule name recorded for the single-candidate shortcut.
pub const SINGLE_CANDIDATE: &str = "single_candidate";

/// Read-only view of the run handed to each strategy.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    profile: &'a ContainerPolicy,
    office_data: &'a ContainerPolicy,
    assigned: &'a ResolvedAssignment,
}

impl<'a> ResolveContext<'a> {
    #[must_use]
    pub const fn policy(&self, kind: ContainerKind) -> &'a ContainerPolicy {
        match kind {
            ContainerKind::Profile => self.profile,
            ContainerKind::OfficeData => self.office_data,
        }
    }

    #[must_use]
    pub const fn both_enabled(&self) -> bool {
        self.profile.enabled && self.office_data.enabled
    }

    #[must_use]
    pub fn enabled_count(&self) -> usize {
        usize::from(self.profile.enabled) + usize::from(self.office_data.enabled)
    }

    /// Enabled and still without a volume.
    #[must_use]
    pub fn is_open(&self, kind: ContainerKind) -> bool {
        self.policy(kind).enabled && !self.assigned.is_assigned(kind)
    }

    /// Open kinds, Profile first.
    pub fn open_kinds(&self) -> impl Iterator<Item = ContainerKind> + '_ {
        ContainerKind::ALL.into_iter().filter(|kind| self.is_open(*kind))
    }
}

/// One link of the identity chain.
pub trait MatchStrategy: Send + Sync {
    /// Rule name recorded on the assignment.
    fn name(&self) -> &'static str;

    /// Kind this strategy claims `volume` for, if it has an opinion.
    ///
    /// A claim for a kind that is not open is ignored by the resolver.
    fn claim(&self, volume: &CandidateVolume, ctx: &ResolveContext<'_>) -> Option<ContainerKind>;
}

/// Relative distance between the volume size and each kind's maximum.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeRatioMatch;

impl SizeRatioMatch {
    /// `|total - max| / max`.
    #[must_use]
    pub fn ratio(total_mb: u64, max_size_mb: u64) -> f64 {
        let max = max_size_mb.max(1) as f64;
        (total_mb as f64 - max).abs() / max
    }
}

impl MatchStrategy for SizeRatioMatch {
    fn name(&self) -> &'static str {
        "size_ratio"
    }

    fn claim(&self, volume: &CandidateVolume, ctx: &ResolveContext<'_>) -> Option<ContainerKind> {
        if !ctx.both_enabled()
            || ctx.policy(ContainerKind::Profile).max_size_mb
                == ctx.policy(ContainerKind::OfficeData).max_size_mb
        {
            return None;
        }

        // Strict `<` keeps the earlier (Profile) kind on ties.
        let mut best: Option<(ContainerKind, f64)> = None;
        for kind in ctx.open_kinds() {
            let ratio = Self::ratio(volume.total_mb, ctx.policy(kind).max_size_mb);
            if best.is_none_or(|(_, current)| ratio < current) {
                best = Some((kind, ratio));
            }
        }
        best.map(|(kind, _)| kind)
    }
}

/// Label patterns for the two kinds.
#[derive(Debug, Clone)]
pub struct LabelMatch {
    profile: Regex,
    office_data: Regex,
}

impl LabelMatch {
    pub fn new(profile_pattern: &str, office_pattern: &str) -> Result<Self> {
        Ok(Self {
            profile: Regex::new(profile_pattern)?,
            office_data: Regex::new(office_pattern)?,
        })
    }
}

impl MatchStrategy for LabelMatch {
    fn name(&self) -> &'static str {
        "label"
    }

    fn claim(&self, volume: &CandidateVolume, ctx: &ResolveContext<'_>) -> Option<ContainerKind> {
        if !ctx.both_enabled() || volume.label.is_empty() {
            return None;
        }
        if ctx.is_open(ContainerKind::Profile) && self.profile.is_match(&volume.label) {
            return Some(ContainerKind::Profile);
        }
        if ctx.is_open(ContainerKind::OfficeData) && self.office_data.is_match(&volume.label) {
            return Some(ContainerKind::OfficeData);
        }
        None
    }
}

/// First free kind, Profile before Office data.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionalMatch;

impl MatchStrategy for PositionalMatch {
    fn name(&self) -> &'static str {
        "positional"
    }

    fn claim(&self, _volume: &CandidateVolume, ctx: &ResolveContext<'_>) -> Option<ContainerKind> {
        if !ctx.both_enabled() {
            return None;
        }
        ctx.open_kinds().next()
    }
}

/// Only one kind is enabled: the first free volume goes to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleKindMatch;

impl MatchStrategy for SingleKindMatch {
    fn name(&self) -> &'static str {
        "single_kind"
    }

    fn claim(&self, _volume: &CandidateVolume, ctx: &ResolveContext<'_>) -> Option<ContainerKind> {
        if ctx.enabled_count() != 1 {
            return None;
        }
        ctx.open_kinds().next()
    }
}

/// Runs the strategy chain over the candidate set.
pub struct ContainerResolver {
    strategies: Vec<Box<dyn MatchStrategy>>,
}

impl ContainerResolver {
    /// Standard chain with label patterns from configuration.
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let labels = LabelMatch::new(&config.profile_label_pattern, &config.office_label_pattern)?;
        Ok(Self::with_strategies(vec![
            Box::new(SizeRatioMatch),
            Box::new(labels),
            Box::new(PositionalMatch),
            Box::new(SingleKindMatch),
        ]))
    }

    /// Custom chain, evaluated in the given order.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        Self { strategies }
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Map candidates to kinds. Deterministic for a given input order.
    #[must_use]
    pub fn resolve(
        &self,
        volumes: &[CandidateVolume],
        profile: &ContainerPolicy,
        office_data: &ContainerPolicy,
    ) -> ResolvedAssignment {
        debug_assert_eq!(profile.kind, ContainerKind::Profile);
        debug_assert_eq!(office_data.kind, ContainerKind::OfficeData);

        let mut assigned = ResolvedAssignment::default();

        if let [only] = volumes
            && profile.enabled != office_data.enabled
        {
            let kind = if profile.enabled {
                ContainerKind::Profile
            } else {
                ContainerKind::OfficeData
            };
            assigned.assign(kind, only.clone(), SINGLE_CANDIDATE);
            return assigned;
        }

        let mut taken = vec![false; volumes.len()];
        for strategy in &self.strategies {
            for (volume, taken) in volumes.iter().zip(taken.iter_mut()) {
                if *taken {
                    continue;
                }
                let claimed = {
                    let ctx = ResolveContext {
                        profile,
                        office_data,
                        assigned: &assigned,
                    };
                    strategy.claim(volume, &ctx).filter(|kind| ctx.is_open(*kind))
                };
                if let Some(kind) = claimed {
                    assigned.assign(kind, volume.clone(), strategy.name());
                    *taken = true;
                }
            }
        }

        for (volume, _) in volumes.iter().zip(&taken).filter(|(_, taken)| !**taken) {
            assigned.leave_unclaimed(volume);
        }

        assigned
    }
}
