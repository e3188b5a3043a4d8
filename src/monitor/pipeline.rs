//! Logon check: one pass of gate → policy → volumes → resolver → evaluator →
//! notification → arm.
//!
//! Nothing in here fails the run. Collaborator errors are logged and the pass
//! continues with whatever data is left; the caller gets a [`RunReport`].

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::fallback::ChainFailure;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::monitor::container::{CandidateVolume, ContainerKind, ContainerPolicy, ResolvedAssignment};
use crate::monitor::cooldown::{CooldownGate, FileCooldownStore, GateState};
use crate::monitor::resolver::ContainerResolver;
use crate::monitor::threshold::{
    Classification, ContainerStatus, Thresholds, evaluate, worst_classification,
};
use crate::notify::{
    BackendChain, DeliveryReport, Notification, NotificationSeverity, NotificationSink,
};
use crate::platform::policy::PolicySource;
use crate::platform::volumes::VolumeSource;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Inside the cooldown window; nothing else was looked at.
    CooldownActive,
    /// Neither container kind is enabled by policy.
    NoEnabledContainers,
    /// No volume passed the candidate filter.
    NoCandidateVolumes,
    /// Volumes exist but none was matched to an enabled kind.
    NoMatchedContainers,
    /// Every matched container is below the warning threshold.
    Healthy,
    /// Dry run that would have sent a notification.
    WouldNotify,
    Notified,
    /// Every backend failed; the cooldown stays unarmed.
    DeliveryFailed,
}

impl RunOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CooldownActive => "cooldown_active",
            Self::NoEnabledContainers => "no_enabled_containers",
            Self::NoCandidateVolumes => "no_candidate_volumes",
            Self::NoMatchedContainers => "no_matched_containers",
            Self::Healthy => "healthy",
            Self::WouldNotify => "would_notify",
            Self::Notified => "notified",
            Self::DeliveryFailed => "delivery_failed",
        }
    }
}

/// Everything a run observed and decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub gate: GateState,
    pub policies: Vec<ContainerPolicy>,
    pub volume_source: Option<String>,
    pub candidates: Vec<CandidateVolume>,
    pub assignment: ResolvedAssignment,
    /// Enabled kinds the resolver could not place.
    pub unmatched: Vec<ContainerKind>,
    pub statuses: Vec<ContainerStatus>,
    pub worst: Classification,
    pub notification: Option<Notification>,
    pub delivery: Option<DeliveryReport>,
    pub cooldown_armed: bool,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>, dry_run: bool, gate: GateState) -> Self {
        Self {
            started_at,
            dry_run,
            outcome: RunOutcome::Healthy,
            gate,
            policies: Vec::new(),
            volume_source: None,
            candidates: Vec::new(),
            assignment: ResolvedAssignment::default(),
            unmatched: Vec::new(),
            statuses: Vec::new(),
            worst: Classification::Healthy,
            notification: None,
            delivery: None,
            cooldown_armed: false,
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Evaluate and report, but never notify and never arm the cooldown.
    pub dry_run: bool,
}

/// One logon-time pass over both containers.
pub struct LogonCheck<'a> {
    policies: &'a PolicySource,
    volumes: &'a VolumeSource,
    resolver: &'a ContainerResolver,
    thresholds: Thresholds,
    sink: &'a dyn NotificationSink,
    gate: CooldownGate<'a>,
}

impl<'a> LogonCheck<'a> {
    #[must_use]
    pub fn new(
        policies: &'a PolicySource,
        volumes: &'a VolumeSource,
        resolver: &'a ContainerResolver,
        thresholds: Thresholds,
        sink: &'a dyn NotificationSink,
        gate: CooldownGate<'a>,
    ) -> Self {
        Self {
            policies,
            volumes,
            resolver,
            thresholds,
            sink,
            gate,
        }
    }

    pub fn run(&self, now: DateTime<Utc>, options: CheckOptions, log: &mut JsonlWriter) -> RunReport {
        log.write_entry(&LogEntry::new(EventType::RunStart, Severity::Info).details(format!(
            "dry_run={} override={} policy_sources={} volume_sources={} strategies={} backends={}",
            options.dry_run,
            self.gate.override_active(),
            self.policies.provider_names().join(","),
            self.volumes.provider_names().join(","),
            self.resolver.strategy_names().join(","),
            self.sink.backend_names().join(",")
        )));

        let (gate, gate_error) = self.gate.evaluate(now);
        if let Some(error) = gate_error {
            log.write_entry(
                &LogEntry::new(EventType::StoreError, Severity::Warning)
                    .ok(false)
                    .error(error.code(), error.to_string())
                    .details("cooldown state unreadable, treating as never notified"),
            );
        }

        let mut report = RunReport::new(now, options.dry_run, gate);
        let finished = self.collect(&mut report, options, log);
        if !finished {
            report.outcome = self.notify(&mut report, now, options, log);
        }

        log.write_entry(
            &LogEntry::new(EventType::RunComplete, Severity::Info).details(format!(
                "outcome={} worst={} unclaimed={}",
                report.outcome.as_str(),
                report.worst,
                report.assignment.unclaimed().len()
            )),
        );
        log.flush();
        report
    }

    /// Fill in everything up to the notification decision. Returns `true`
    /// when the run ends early with `report.outcome` already set.
    fn collect(&self, report: &mut RunReport, options: CheckOptions, log: &mut JsonlWriter) -> bool {
        if let GateState::Suppressed { until, .. } = report.gate
            && !options.dry_run
        {
            log.write_entry(
                &LogEntry::new(EventType::CooldownSuppressed, Severity::Info)
                    .details(format!("suppressed until {}", until.to_rfc3339())),
            );
            report.outcome = RunOutcome::CooldownActive;
            return true;
        }

        for kind in ContainerKind::ALL {
            let resolution = self.policies.get(kind);
            let mut entry = LogEntry::new(EventType::PolicyResolved, Severity::Info)
                .kind(kind)
                .source(resolution.enabled_source.as_deref().unwrap_or("default"))
                .details(format!(
                    "enabled={} max_size_mb={} size_source={}",
                    resolution.policy.enabled,
                    resolution.policy.max_size_mb,
                    resolution.size_source.as_deref().unwrap_or("default")
                ));
            entry.max_mb = Some(resolution.policy.max_size_mb);
            log.write_entry(&entry);
            log_failures(log, EventType::PolicyResolved, Some(kind), &resolution.failures);
            report.policies.push(resolution.policy);
        }

        let (profile, office_data) = (report.policies[0], report.policies[1]);
        if !profile.enabled && !office_data.enabled {
            report.outcome = RunOutcome::NoEnabledContainers;
            return true;
        }

        let listing = self.volumes.list();
        log.write_entry(
            &LogEntry::new(EventType::VolumesEnumerated, Severity::Info)
                .source(listing.source.as_deref().unwrap_or("none"))
                .details(format!(
                    "records={} candidates={} rejected={}",
                    listing.total_records,
                    listing.candidates.len(),
                    listing.rejected.len()
                )),
        );
        log_failures(log, EventType::VolumesEnumerated, None, &listing.failures);
        report.volume_source = listing.source;
        report.candidates = listing.candidates;

        if report.candidates.is_empty() {
            report.outcome = RunOutcome::NoCandidateVolumes;
            return true;
        }

        report.assignment = self.resolver.resolve(&report.candidates, &profile, &office_data);

        for policy in [profile, office_data].into_iter().filter(|p| p.enabled) {
            let Some(assigned) = report.assignment.assignment(policy.kind) else {
                log.write_entry(
                    &LogEntry::new(EventType::ContainerUnmatched, Severity::Warning)
                        .kind(policy.kind)
                        .details("no candidate volume matched"),
                );
                report.unmatched.push(policy.kind);
                continue;
            };

            let mut resolved = LogEntry::new(EventType::ContainerResolved, Severity::Info)
                .kind(policy.kind)
                .source(assigned.matched_by);
            resolved.volume_id = Some(assigned.volume.id.clone());
            resolved.label = Some(assigned.volume.label.clone());
            log.write_entry(&resolved);

            let status = evaluate(policy.kind, assigned.volume.used_mb, policy.max_size_mb, &self.thresholds);
            let mut evaluated = LogEntry::new(EventType::ContainerEvaluated, severity_for(status.classification))
                .kind(policy.kind);
            evaluated.volume_id = Some(assigned.volume.id.clone());
            evaluated.used_mb = Some(status.used_mb);
            evaluated.max_mb = Some(status.max_mb);
            evaluated.pct = Some(status.pct);
            evaluated.classification = Some(status.classification);
            log.write_entry(&evaluated);

            report.statuses.push(status);
        }

        report.worst = worst_classification(&report.statuses);

        if report.statuses.is_empty() {
            report.outcome = RunOutcome::NoMatchedContainers;
            return true;
        }
        if !report.worst.warrants_notice() {
            report.outcome = RunOutcome::Healthy;
            return true;
        }
        false
    }

    fn notify(
        &self,
        report: &mut RunReport,
        now: DateTime<Utc>,
        options: CheckOptions,
        log: &mut JsonlWriter,
    ) -> RunOutcome {
        let Some(notification) = compose_notification(&report.statuses) else {
            return RunOutcome::Healthy;
        };
        report.notification = Some(notification.clone());

        if options.dry_run {
            return RunOutcome::WouldNotify;
        }

        let delivery = self.sink.send(&notification);
        if delivery.delivered {
            log.write_entry(
                &LogEntry::new(EventType::NotificationSent, severity_for(report.worst))
                    .source(delivery.backend.as_deref().unwrap_or("unknown"))
                    .ok(true)
                    .details(notification.title.clone()),
            );
        } else {
            log.write_entry(
                &LogEntry::new(EventType::NotificationFailed, Severity::Warning)
                    .ok(false)
                    .details(format!("{} backend(s) failed", delivery.failures.len())),
            );
        }
        log_failures(log, EventType::NotificationFailed, None, &delivery.failures);

        let delivered = delivery.delivered;
        report.delivery = Some(delivery);
        if !delivered {
            return RunOutcome::DeliveryFailed;
        }

        match self.gate.arm(now) {
            Ok(()) => {
                report.cooldown_armed = true;
                log.write_entry(
                    &LogEntry::new(EventType::CooldownArmed, Severity::Info)
                        .ok(true)
                        .details(format!("last_notified_at={}", now.to_rfc3339())),
                );
            }
            Err(error) => {
                log.write_entry(
                    &LogEntry::new(EventType::StoreError, Severity::Warning)
                        .ok(false)
                        .error(error.code(), error.to_string())
                        .details("cooldown state not saved"),
                );
            }
        }
        RunOutcome::Notified
    }
}

/// Build every collaborator from `config` and run one check at `now`.
///
/// Only an unusable configuration (bad thresholds or label patterns) is an
/// error; everything past that point is reported in the [`RunReport`].
pub fn run_configured(
    config: &Config,
    now: DateTime<Utc>,
    options: CheckOptions,
    force: bool,
) -> Result<RunReport> {
    let thresholds = Thresholds::from_config(&config.thresholds)?;
    let resolver = ContainerResolver::from_config(&config.resolver)?;
    let policies = PolicySource::from_config(&config.policy);
    let volumes = VolumeSource::from_config(&config.volumes);
    let sink = BackendChain::from_config(&config.notifications);
    let store = FileCooldownStore::new(config.paths.state_file.clone());
    let gate = CooldownGate::from_hours(&store, config.cooldown.window_hours, force);

    let mut log = if config.logging.enabled {
        JsonlWriter::open(JsonlConfig::from_config(config))
    } else {
        JsonlWriter::discard()
    };

    let check = LogonCheck::new(&policies, &volumes, &resolver, thresholds, &sink, gate);
    Ok(check.run(now, options, &mut log))
}

/// Message for the notice-worthy containers in `statuses`; `None` when all
/// are healthy.
#[must_use]
pub fn compose_notification(statuses: &[ContainerStatus]) -> Option<Notification> {
    let severity = match worst_classification(statuses) {
        Classification::Healthy => return None,
        Classification::Warning => NotificationSeverity::Warning,
        Classification::Critical => NotificationSeverity::Critical,
    };

    let mut lines: Vec<String> = statuses
        .iter()
        .filter(|s| s.classification.warrants_notice())
        .map(ContainerStatus::summary)
        .collect();

    let (title, advice) = match severity {
        NotificationSeverity::Critical => (
            "Storage container almost full",
            "Delete files you no longer need now, or contact IT support before the container runs out of space.",
        ),
        NotificationSeverity::Warning => (
            "Storage container filling up",
            "Consider removing files you no longer need.",
        ),
    };
    lines.push(advice.to_string());

    Some(Notification::new(title, lines.join("\n"), severity))
}

const fn severity_for(classification: Classification) -> Severity {
    match classification {
        Classification::Healthy => Severity::Info,
        Classification::Warning => Severity::Warning,
        Classification::Critical => Severity::Critical,
    }
}

fn log_failures(log: &mut JsonlWriter, event: EventType, kind: Option<ContainerKind>, failures: &[ChainFailure]) {
    for failure in failures {
        let mut entry = LogEntry::new(event, Severity::Warning)
            .source(failure.provider.clone())
            .ok(false)
            .error(failure.code, failure.message.clone());
        entry.kind = kind;
        log.write_entry(&entry);
    }
}
