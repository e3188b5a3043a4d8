//! Threshold evaluator: turns used/maximum sizes into a classification.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::ThresholdConfig;
use crate::core::errors::{CqsError, Result};
use crate::monitor::container::ContainerKind;

/// Utilization bucket, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Healthy,
    Warning,
    Critical,
}

impl Classification {
    /// Whether the user should hear about this.
    #[must_use]
    pub const fn warrants_notice(self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Validated warning/critical percentages; `critical_pct >= warning_pct`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    warning_pct: f64,
    critical_pct: f64,
}

impl Thresholds {
    pub fn new(warning_pct: f64, critical_pct: f64) -> Result<Self> {
        if !warning_pct.is_finite() || !critical_pct.is_finite() || warning_pct < 0.0 {
            return Err(CqsError::InvalidConfig {
                details: format!(
                    "thresholds must be finite and >= 0, got warning={warning_pct} critical={critical_pct}"
                ),
            });
        }
        if critical_pct < warning_pct {
            return Err(CqsError::InvalidConfig {
                details: format!(
                    "critical threshold ({critical_pct}) must be >= warning threshold ({warning_pct})"
                ),
            });
        }
        Ok(Self {
            warning_pct,
            critical_pct,
        })
    }

    pub fn from_config(config: &ThresholdConfig) -> Result<Self> {
        Self::new(config.warning_pct, config.critical_pct)
    }

    #[must_use]
    pub const fn warning_pct(&self) -> f64 {
        self.warning_pct
    }

    #[must_use]
    pub const fn critical_pct(&self) -> f64 {
        self.critical_pct
    }

    #[must_use]
    pub fn classify(&self, pct: f64) -> Classification {
        if pct >= self.critical_pct {
            Classification::Critical
        } else if pct >= self.warning_pct {
            Classification::Warning
        } else {
            Classification::Healthy
        }
    }
}

/// Utilization of one resolved container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerStatus {
    pub kind: ContainerKind,
    pub used_mb: u64,
    pub max_mb: u64,
    /// Percentage of the maximum in use, one decimal.
    pub pct: f64,
    /// Negative when usage exceeds the configured maximum.
    pub remaining_mb: i64,
    pub classification: Classification,
}

impl ContainerStatus {
    /// One-line summary, e.g. `Profile: 92.8% used (19000 MB of 20480 MB, 1480 MB free)`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.remaining_mb < 0 {
            format!(
                "{}: {:.1}% used ({} MB of {} MB, {} MB over the limit)",
                self.kind.display_name(),
                self.pct,
                self.used_mb,
                self.max_mb,
                self.remaining_mb.unsigned_abs()
            )
        } else {
            format!(
                "{}: {:.1}% used ({} MB of {} MB, {} MB free)",
                self.kind.display_name(),
                self.pct,
                self.used_mb,
                self.max_mb,
                self.remaining_mb
            )
        }
    }
}

/// Classify one container. `max_mb` must be > 0.
#[must_use]
pub fn evaluate(kind: ContainerKind, used_mb: u64, max_mb: u64, thresholds: &Thresholds) -> ContainerStatus {
    debug_assert!(max_mb > 0, "max_mb must be positive");
    let pct = round_one_decimal(used_mb as f64 / max_mb.max(1) as f64 * 100.0);
    let remaining_mb = i64::try_from(i128::from(max_mb) - i128::from(used_mb)).unwrap_or_else(|_| {
        if used_mb > max_mb { i64::MIN } else { i64::MAX }
    });
    ContainerStatus {
        kind,
        used_mb,
        max_mb,
        pct,
        remaining_mb,
        classification: thresholds.classify(pct),
    }
}

/// Worst classification among `statuses`; Healthy when empty.
#[must_use]
pub fn worst_classification(statuses: &[ContainerStatus]) -> Classification {
    statuses
        .iter()
        .map(|s| s.classification)
        .max()
        .unwrap_or(Classification::Healthy)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn thresholds() -> Thresholds {
        Thresholds::new(80.0, 95.0).expect("valid thresholds")
    }

    #[test]
    fn warning_band_example() {
        let status = evaluate(ContainerKind::Profile, 19_000, 20_480, &thresholds());
        assert!((status.pct - 92.8).abs() < 1e-9);
        assert_eq!(status.classification, Classification::Warning);
        assert_eq!(status.remaining_mb, 1_480);
    }

    #[test]
    fn boundaries_are_inclusive() {
        let t = thresholds();
        assert_eq!(evaluate(ContainerKind::Profile, 80, 100, &t).classification, Classification::Warning);
        assert_eq!(evaluate(ContainerKind::Profile, 95, 100, &t).classification, Classification::Critical);
        assert_eq!(evaluate(ContainerKind::Profile, 79, 100, &t).classification, Classification::Healthy);
    }

    #[test]
    fn rounding_can_lift_into_the_next_band() {
        // 79.96% rounds to 80.0%.
        let status = evaluate(ContainerKind::OfficeData, 7_996, 10_000, &thresholds());
        assert!((status.pct - 80.0).abs() < 1e-9);
        assert_eq!(status.classification, Classification::Warning);
    }

    #[test]
    fn overage_keeps_negative_remaining() {
        let status = evaluate(ContainerKind::OfficeData, 11_000, 10_240, &thresholds());
        assert_eq!(status.remaining_mb, -760);
        assert_eq!(status.classification, Classification::Critical);
        assert!(status.summary().contains("760 MB over the limit"));
    }

    #[test]
    fn summary_mentions_free_space() {
        let status = evaluate(ContainerKind::Profile, 19_000, 20_480, &thresholds());
        assert_eq!(
            status.summary(),
            "Profile: 92.8% used (19000 MB of 20480 MB, 1480 MB free)"
        );
    }

    #[test]
    fn equal_thresholds_skip_warning() {
        let t = Thresholds::new(90.0, 90.0).expect("equal thresholds are valid");
        assert_eq!(t.classify(90.0), Classification::Critical);
        assert_eq!(t.classify(89.9), Classification::Healthy);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        assert!(Thresholds::new(95.0, 80.0).is_err());
        assert!(Thresholds::new(f64::NAN, 80.0).is_err());
        assert!(Thresholds::new(-1.0, 80.0).is_err());
    }

    #[test]
    fn worst_classification_dominance() {
        let t = thresholds();
        let healthy = evaluate(ContainerKind::Profile, 10, 100, &t);
        let warning = evaluate(ContainerKind::Profile, 85, 100, &t);
        let critical = evaluate(ContainerKind::OfficeData, 99, 100, &t);
        assert_eq!(worst_classification(&[]), Classification::Healthy);
        assert_eq!(worst_classification(&[healthy.clone()]), Classification::Healthy);
        assert_eq!(
            worst_classification(&[healthy.clone(), warning.clone()]),
            Classification::Warning
        );
        assert_eq!(
            worst_classification(&[warning, critical, healthy]),
            Classification::Critical
        );
    }

    proptest! {
        #[test]
        fn classification_is_monotonic_in_usage(
            used in 0u64..200_000,
            extra in 0u64..50_000,
            max in 1u64..150_000,
            warning in 0.0f64..150.0,
            gap in 0.0f64..50.0,
        ) {
            let t = Thresholds::new(warning, warning + gap).unwrap();
            let lower = evaluate(ContainerKind::Profile, used, max, &t);
            let higher = evaluate(ContainerKind::Profile, used + extra, max, &t);
            prop_assert!(higher.classification >= lower.classification);
            prop_assert!(higher.pct >= lower.pct);
        }

        #[test]
        fn remaining_is_max_minus_used(used in 0u64..1_000_000, max in 1u64..1_000_000) {
            let status = evaluate(ContainerKind::OfficeData, used, max, &thresholds());
            prop_assert_eq!(status.remaining_mb, max as i64 - used as i64);
        }
    }
}
