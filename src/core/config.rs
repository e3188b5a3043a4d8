//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{CqsError, Result};
use crate::notify::NotificationConfig;

/// Policy provider names accepted in `policy.sources`.
pub const POLICY_SOURCES: [&str; 3] = ["overrides", "policy_registry", "registry"];

/// Volume provider names accepted in `volumes.sources`.
pub const VOLUME_SOURCES: [&str; 3] = ["storage", "wmi", "inventory"];

/// Size assumed for a container whose maximum is not configured anywhere.
pub const DEFAULT_MAX_SIZE_MB: u64 = 30_720;

/// Full CQS configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub thresholds: ThresholdConfig,
    pub cooldown: CooldownConfig,
    pub policy: PolicyConfig,
    pub volumes: VolumeConfig,
    pub resolver: ResolverConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Utilization percentages at which a container is reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub warning_pct: f64,
    pub critical_pct: f64,
}

/// Minimum spacing between two notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CooldownConfig {
    /// Hours after a notification during which further notifications are suppressed.
    pub window_hours: f64,
}

/// Where container enablement and size limits come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Provider names in priority order; the first one holding a value wins.
    pub sources: Vec<String>,
    /// Size used when no provider reports one.
    pub default_max_size_mb: u64,
    /// Local values for the profile container (the `overrides` provider).
    pub profile: PolicyOverride,
    /// Local values for the Office data container (the `overrides` provider).
    pub office: PolicyOverride,
}

/// Locally configured policy values for one container kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyOverride {
    pub enabled: Option<bool>,
    pub max_size_mb: Option<u64>,
}

/// Volume enumeration sources and the plausibility band for candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VolumeConfig {
    /// Provider names in priority order; the first one that enumerates wins.
    pub sources: Vec<String>,
    /// JSON inventory read by the `inventory` provider.
    pub inventory_file: Option<PathBuf>,
    /// Smallest volume considered a container.
    pub min_size_mb: u64,
    /// Largest volume considered a container.
    pub max_size_mb: u64,
}

/// Label patterns used when sizes cannot tell the containers apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    pub profile_label_pattern: String,
    pub office_label_pattern: String,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by cqs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Cooldown timestamp document.
    pub state_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning_pct: 80.0,
            critical_pct: 95.0,
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self { window_hours: 8.0 }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            sources: POLICY_SOURCES.iter().map(ToString::to_string).collect(),
            default_max_size_mb: DEFAULT_MAX_SIZE_MB,
            profile: PolicyOverride::default(),
            office: PolicyOverride::default(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            sources: VOLUME_SOURCES.iter().map(ToString::to_string).collect(),
            inventory_file: None,
            min_size_mb: 100,
            max_size_mb: 2 * 1024 * 1024,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            profile_label_pattern: "(?i)profile".to_string(),
            office_label_pattern: "(?i)(odfc|office|o365)".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_path: Some(env::temp_dir().join("cqs-activity.jsonl")),
            max_size_bytes: 5 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            config_file: config_dir().join("config.toml"),
            state_file: data.join("cooldown.json"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

/// Per-user data directory (cooldown state, activity log).
pub(crate) fn data_dir() -> PathBuf {
    if cfg!(windows)
        && let Some(local) = env::var_os("LOCALAPPDATA")
    {
        return PathBuf::from(local).join("ContainerQuotaSentinel");
    }
    home_dir().join(".local").join("share").join("cqs")
}

/// Machine-wide configuration directory.
fn config_dir() -> PathBuf {
    if cfg!(windows)
        && let Some(program_data) = env::var_os("ProgramData")
    {
        return PathBuf::from(program_data).join("ContainerQuotaSentinel");
    }
    home_dir().join(".config").join("cqs")
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map_or_else(
            || {
                eprintln!("[CQS-CONFIG] WARNING: HOME not set, falling back to temp dir for data paths");
                env::temp_dir()
            },
            PathBuf::from,
        )
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| CqsError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(CqsError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CQS_WARNING_PCT") {
            self.thresholds.warning_pct = parse_env_f64("CQS_WARNING_PCT", &raw)?;
        }
        if let Some(raw) = lookup("CQS_CRITICAL_PCT") {
            self.thresholds.critical_pct = parse_env_f64("CQS_CRITICAL_PCT", &raw)?;
        }
        if let Some(raw) = lookup("CQS_COOLDOWN_HOURS") {
            self.cooldown.window_hours = parse_env_f64("CQS_COOLDOWN_HOURS", &raw)?;
        }
        if let Some(raw) = lookup("CQS_COOLDOWN_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CQS_DEFAULT_MAX_SIZE_MB") {
            self.policy.default_max_size_mb = parse_env_u64("CQS_DEFAULT_MAX_SIZE_MB", &raw)?;
        }
        if let Some(raw) = lookup("CQS_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_env_bool("CQS_NOTIFICATIONS_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("CQS_VOLUME_INVENTORY") {
            self.volumes.inventory_file = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    /// Lower-case and trim provider names so comparisons are exact.
    fn normalize(&mut self) {
        for list in [
            &mut self.policy.sources,
            &mut self.volumes.sources,
            &mut self.notifications.backends,
        ] {
            for name in list.iter_mut() {
                *name = name.trim().to_ascii_lowercase();
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, val) in [("warning_pct", t.warning_pct), ("critical_pct", t.critical_pct)] {
            if !val.is_finite() || val < 0.0 {
                return Err(CqsError::InvalidConfig {
                    details: format!("thresholds.{name} must be a finite value >= 0, got {val}"),
                });
            }
        }
        if t.critical_pct < t.warning_pct {
            return Err(CqsError::InvalidConfig {
                details: format!(
                    "thresholds.critical_pct ({}) must be >= thresholds.warning_pct ({})",
                    t.critical_pct, t.warning_pct
                ),
            });
        }

        if !self.cooldown.window_hours.is_finite() || self.cooldown.window_hours < 0.0 {
            return Err(CqsError::InvalidConfig {
                details: format!(
                    "cooldown.window_hours must be a finite value >= 0, got {}",
                    self.cooldown.window_hours
                ),
            });
        }

        if self.policy.default_max_size_mb == 0 {
            return Err(CqsError::InvalidConfig {
                details: "policy.default_max_size_mb must be > 0".to_string(),
            });
        }
        validate_names("policy.sources", &self.policy.sources, &POLICY_SOURCES)?;

        if self.volumes.max_size_mb == 0 || self.volumes.min_size_mb > self.volumes.max_size_mb {
            return Err(CqsError::InvalidConfig {
                details: format!(
                    "volumes size band must satisfy 0 <= min_size_mb <= max_size_mb and max_size_mb > 0, got {}..{}",
                    self.volumes.min_size_mb, self.volumes.max_size_mb
                ),
            });
        }
        validate_names("volumes.sources", &self.volumes.sources, &VOLUME_SOURCES)?;

        regex::Regex::new(&self.resolver.profile_label_pattern)?;
        regex::Regex::new(&self.resolver.office_label_pattern)?;

        validate_names(
            "notifications.backends",
            &self.notifications.backends,
            &crate::notify::BACKEND_NAMES,
        )?;

        if self.logging.max_size_bytes == 0 {
            return Err(CqsError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_names(field: &str, names: &[String], known: &[&str]) -> Result<()> {
    if names.is_empty() {
        return Err(CqsError::InvalidConfig {
            details: format!("{field} must list at least one entry"),
        });
    }
    for name in names {
        if !known.contains(&name.as_str()) {
            return Err(CqsError::InvalidConfig {
                details: format!("{field} contains unknown entry {name:?}; expected one of {known:?}"),
            });
        }
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_f64(name: &str, raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|error| CqsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| CqsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| CqsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
