//! Policy source: container enablement and size limits.
//!
//! Each field is looked up independently through an ordered provider chain;
//! the first provider holding a value wins. With no value anywhere a container
//! is disabled and its maximum falls back to the configured default.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::config::{PolicyConfig, PolicyOverride};
use crate::core::errors::{CqsError, Result};
use crate::core::fallback::{ChainFailure, Provider, first_success};
use crate::monitor::container::{ContainerKind, ContainerPolicy};
use crate::platform::command::{require_windows, run_capture};

/// A single policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyField {
    Enabled,
    MaxSizeMb,
}

impl PolicyField {
    /// Registry value name.
    #[must_use]
    pub const fn value_name(self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::MaxSizeMb => "SizeInMBs",
        }
    }
}

/// One place policy values can come from.
pub trait PolicyProvider: Provider + Send + Sync {
    /// Raw numeric value; `Ok(None)` when this provider has nothing set.
    fn lookup(&self, kind: ContainerKind, field: PolicyField) -> Result<Option<u64>>;
}

/// Values from the `[policy.profile]` / `[policy.office]` config tables.
#[derive(Debug, Clone, Default)]
pub struct ConfigPolicyProvider {
    profile: PolicyOverride,
    office: PolicyOverride,
}

impl ConfigPolicyProvider {
    #[must_use]
    pub fn new(profile: PolicyOverride, office: PolicyOverride) -> Self {
        Self { profile, office }
    }
}

impl Provider for ConfigPolicyProvider {
    fn name(&self) -> &str {
        "overrides"
    }
}

impl PolicyProvider for ConfigPolicyProvider {
    fn lookup(&self, kind: ContainerKind, field: PolicyField) -> Result<Option<u64>> {
        let values = match kind {
            ContainerKind::Profile => &self.profile,
            ContainerKind::OfficeData => &self.office,
        };
        Ok(match field {
            PolicyField::Enabled => values.enabled.map(u64::from),
            PolicyField::MaxSizeMb => values.max_size_mb,
        })
    }
}

/// Registry hive a [`RegistryPolicyProvider`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryHive {
    /// Group Policy managed keys.
    Policies,
    /// Keys written by the agent installer or by hand.
    Software,
}

/// Reads `Enabled` / `SizeInMBs` through `reg query`.
#[derive(Debug, Clone, Copy)]
pub struct RegistryPolicyProvider {
    hive: RegistryHive,
}

impl RegistryPolicyProvider {
    #[must_use]
    pub const fn new(hive: RegistryHive) -> Self {
        Self { hive }
    }

    #[must_use]
    pub const fn key_path(&self, kind: ContainerKind) -> &'static str {
        match (self.hive, kind) {
            (RegistryHive::Policies, ContainerKind::Profile) => {
                r"HKLM\SOFTWARE\Policies\FSLogix\Profiles"
            }
            (RegistryHive::Policies, ContainerKind::OfficeData) => {
                r"HKLM\SOFTWARE\Policies\FSLogix\ODFC"
            }
            (RegistryHive::Software, ContainerKind::Profile) => r"HKLM\SOFTWARE\FSLogix\Profiles",
            (RegistryHive::Software, ContainerKind::OfficeData) => r"HKLM\SOFTWARE\FSLogix\ODFC",
        }
    }
}

impl Provider for RegistryPolicyProvider {
    fn name(&self) -> &str {
        match self.hive {
            RegistryHive::Policies => "policy_registry",
            RegistryHive::Software => "registry",
        }
    }
}

impl PolicyProvider for RegistryPolicyProvider {
    fn lookup(&self, kind: ContainerKind, field: PolicyField) -> Result<Option<u64>> {
        require_windows("registry policy lookup")?;
        let key = self.key_path(kind);
        let output = run_capture("reg", &["query", key, "/v", field.value_name()])?;
        if !output.success {
            // reg.exe exits 1 when the key or value does not exist.
            return Ok(None);
        }
        parse_reg_query(&output.stdout, field.value_name()).map_err(|details| {
            CqsError::PolicyLookup {
                source_name: self.name().to_string(),
                details: format!("{key}\\{}: {details}", field.value_name()),
            }
        })
    }
}

/// Extract a numeric value from `reg query` output.
///
/// Lines look like `    SizeInMBs    REG_DWORD    0x7800`. DWORD/QWORD values
/// are hex; string values are parsed as decimal.
pub fn parse_reg_query(stdout: &str, value_name: &str) -> std::result::Result<Option<u64>, String> {
    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(kind)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !name.eq_ignore_ascii_case(value_name) {
            continue;
        }
        let raw = parts.collect::<Vec<_>>().join(" ");
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        return match kind {
            "REG_DWORD" | "REG_QWORD" => {
                let hex = raw
                    .strip_prefix("0x")
                    .or_else(|| raw.strip_prefix("0X"))
                    .unwrap_or(raw);
                u64::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|error| format!("bad {kind} value {raw:?}: {error}"))
            }
            "REG_SZ" | "REG_EXPAND_SZ" => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|error| format!("bad {kind} value {raw:?}: {error}")),
            other => Err(format!("unsupported registry type {other}")),
        };
    }
    Ok(None)
}

/// Where a policy's two fields came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyResolution {
    pub policy: ContainerPolicy,
    /// Provider that supplied `enabled`; `None` means the built-in default.
    pub enabled_source: Option<String>,
    /// Provider that supplied the maximum; `None` means the built-in default.
    pub size_source: Option<String>,
    pub failures: Vec<ChainFailure>,
}

/// Ordered policy providers plus the default size.
pub struct PolicySource {
    providers: Vec<Box<dyn PolicyProvider>>,
    default_max_size_mb: u64,
}

impl PolicySource {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn PolicyProvider>>, default_max_size_mb: u64) -> Self {
        Self {
            providers,
            default_max_size_mb: default_max_size_mb.max(1),
        }
    }

    /// Provider chain in the order given by `policy.sources`.
    #[must_use]
    pub fn from_config(config: &PolicyConfig) -> Self {
        let providers = config
            .sources
            .iter()
            .filter_map(|name| -> Option<Box<dyn PolicyProvider>> {
                match name.as_str() {
                    "overrides" => Some(Box::new(ConfigPolicyProvider::new(
                        config.profile.clone(),
                        config.office.clone(),
                    ))),
                    "policy_registry" => Some(Box::new(RegistryPolicyProvider::new(RegistryHive::Policies))),
                    "registry" => Some(Box::new(RegistryPolicyProvider::new(RegistryHive::Software))),
                    _ => None,
                }
            })
            .collect();
        Self::new(providers, config.default_max_size_mb)
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Policy for `kind`. Never fails: missing values fall back to defaults.
    #[must_use]
    pub fn get(&self, kind: ContainerKind) -> PolicyResolution {
        let enabled = first_success(&self.providers, |p| p.lookup(kind, PolicyField::Enabled));
        let size = first_success(&self.providers, |p| {
            Ok(p.lookup(kind, PolicyField::MaxSizeMb)?.filter(|mb| *mb > 0))
        });

        let mut failures = enabled.failures.clone();
        for failure in &size.failures {
            if !failures.contains(failure) {
                failures.push(failure.clone());
            }
        }

        PolicyResolution {
            policy: ContainerPolicy::new(
                kind,
                enabled.value.is_some_and(|v| v != 0),
                size.value.unwrap_or(self.default_max_size_mb),
            ),
            enabled_source: enabled.source,
            size_source: size.source,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES_OUTPUT: &str = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\FSLogix\\Profiles\r\n    SizeInMBs    REG_DWORD    0x7800\r\n\r\n";

    struct FailingProvider;

    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "broken"
        }
    }

    impl PolicyProvider for FailingProvider {
        fn lookup(&self, _: ContainerKind, _: PolicyField) -> Result<Option<u64>> {
            Err(CqsError::PolicyLookup {
                source_name: "broken".to_string(),
                details: "access denied".to_string(),
            })
        }
    }

    fn overrides(enabled: Option<bool>, max: Option<u64>) -> PolicyOverride {
        PolicyOverride {
            enabled,
            max_size_mb: max,
        }
    }

    #[test]
    fn parse_dword_hex() {
        assert_eq!(parse_reg_query(PROFILES_OUTPUT, "SizeInMBs"), Ok(Some(30_720)));
        assert_eq!(parse_reg_query(PROFILES_OUTPUT, "sizeinmbs"), Ok(Some(30_720)));
    }

    #[test]
    fn parse_missing_value_is_none() {
        assert_eq!(parse_reg_query(PROFILES_OUTPUT, "Enabled"), Ok(None));
        assert_eq!(parse_reg_query("", "Enabled"), Ok(None));
    }

    #[test]
    fn parse_string_value_as_decimal() {
        let out = "    SizeInMBs    REG_SZ    20480\n";
        assert_eq!(parse_reg_query(out, "SizeInMBs"), Ok(Some(20_480)));
    }

    #[test]
    fn parse_garbage_is_an_error() {
        let out = "    Enabled    REG_DWORD    0xZZ\n";
        assert!(parse_reg_query(out, "Enabled").is_err());
        let binary = "    Enabled    REG_BINARY    01\n";
        assert!(parse_reg_query(binary, "Enabled").is_err());
    }

    #[test]
    fn config_overrides_answer_per_kind() {
        let provider = ConfigPolicyProvider::new(overrides(Some(true), Some(20_480)), overrides(None, None));
        assert_eq!(provider.lookup(ContainerKind::Profile, PolicyField::Enabled).unwrap(), Some(1));
        assert_eq!(provider.lookup(ContainerKind::Profile, PolicyField::MaxSizeMb).unwrap(), Some(20_480));
        assert_eq!(provider.lookup(ContainerKind::OfficeData, PolicyField::Enabled).unwrap(), None);
    }

    #[test]
    fn registry_key_paths() {
        let policies = RegistryPolicyProvider::new(RegistryHive::Policies);
        let software = RegistryPolicyProvider::new(RegistryHive::Software);
        assert!(policies.key_path(ContainerKind::OfficeData).ends_with(r"Policies\FSLogix\ODFC"));
        assert!(software.key_path(ContainerKind::Profile).ends_with(r"FSLogix\Profiles"));
        assert_eq!(policies.name(), "policy_registry");
        assert_eq!(software.name(), "registry");
    }

    #[test]
    fn nothing_configured_means_disabled_with_default_size() {
        let source = PolicySource::new(Vec::new(), 30_720);
        let got = source.get(ContainerKind::Profile);
        assert_eq!(got.policy, ContainerPolicy::new(ContainerKind::Profile, false, 30_720));
        assert!(got.enabled_source.is_none());
        assert!(got.size_source.is_none());
    }

    #[test]
    fn first_provider_with_a_value_wins_per_field() {
        let source = PolicySource::new(
            vec![
                Box::new(ConfigPolicyProvider::new(overrides(Some(true), None), overrides(None, None))),
                Box::new(ConfigPolicyProvider::new(overrides(Some(false), Some(10_240)), overrides(None, None))),
            ],
            30_720,
        );
        let got = source.get(ContainerKind::Profile);
        assert!(got.policy.enabled);
        assert_eq!(got.policy.max_size_mb, 10_240);
        assert_eq!(got.enabled_source.as_deref(), Some("overrides"));
    }

    #[test]
    fn zero_size_counts_as_missing() {
        let source = PolicySource::new(
            vec![Box::new(ConfigPolicyProvider::new(overrides(Some(true), Some(0)), overrides(None, None)))],
            30_720,
        );
        let got = source.get(ContainerKind::Profile);
        assert_eq!(got.policy.max_size_mb, 30_720);
        assert!(got.size_source.is_none());
    }

    #[test]
    fn failing_provider_is_skipped_and_recorded_once() {
        let source = PolicySource::new(
            vec![
                Box::new(FailingProvider),
                Box::new(ConfigPolicyProvider::new(overrides(None, None), overrides(Some(true), Some(5_120)))),
            ],
            30_720,
        );
        let got = source.get(ContainerKind::OfficeData);
        assert_eq!(got.policy, ContainerPolicy::new(ContainerKind::OfficeData, true, 5_120));
        assert_eq!(got.failures.len(), 1);
        assert_eq!(got.failures[0].provider, "broken");
    }

    #[test]
    fn from_config_follows_source_order() {
        let config = PolicyConfig {
            sources: vec!["registry".to_string(), "overrides".to_string()],
            ..PolicyConfig::default()
        };
        let source = PolicySource::from_config(&config);
        assert_eq!(source.provider_names(), vec!["registry", "overrides"]);
    }

    #[cfg(not(windows))]
    #[test]
    fn registry_lookup_fails_soft_off_windows() {
        let config = PolicyConfig {
            profile: overrides(Some(true), Some(20_480)),
            ..PolicyConfig::default()
        };
        let source = PolicySource::from_config(&config);
        let got = source.get(ContainerKind::Profile);
        assert_eq!(got.policy, ContainerPolicy::new(ContainerKind::Profile, true, 20_480));
        let got = source.get(ContainerKind::OfficeData);
        assert!(!got.policy.enabled);
        assert!(got.failures.iter().all(|f| f.code == "CQS-1101"));
        assert_eq!(got.failures.len(), 2);
    }
}
