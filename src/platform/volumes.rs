//! Volume source: mounted volumes that could be user containers.
//!
//! Providers are tried in order; the first that can enumerate wins even if it
//! reports nothing. The listing is then narrowed by [`CandidateFilter`].

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::config::VolumeConfig;
use crate::core::errors::{CqsError, Result};
use crate::core::fallback::{ChainFailure, Provider, first_success};
use crate::monitor::container::CandidateVolume;
use crate::platform::command::run_powershell;

const MIB: u64 = 1024 * 1024;

/// What a volume is stored on, as far as the provider can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskBacking {
    /// A file-backed virtual disk (VHD/VHDX).
    Virtual,
    Physical,
    #[default]
    Unknown,
}

/// One mounted volume as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub drive_letter: Option<String>,
    pub size_bytes: u64,
    pub free_bytes: u64,
    #[serde(default)]
    pub backing: DiskBacking,
}

impl VolumeRecord {
    #[must_use]
    pub fn total_mb(&self) -> u64 {
        self.size_bytes / MIB
    }

    #[must_use]
    pub fn used_mb(&self) -> u64 {
        self.size_bytes.saturating_sub(self.free_bytes) / MIB
    }

    #[must_use]
    pub fn to_candidate(&self) -> CandidateVolume {
        CandidateVolume::new(self.id.clone(), self.label.clone(), self.used_mb(), self.total_mb())
    }
}

/// Why a record was not considered a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    HasDriveLetter,
    PhysicalDisk,
    TooSmall,
    TooLarge,
}

/// Keeps volumes that look like attached containers: no drive letter, not on
/// a physical disk, total size inside the configured band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFilter {
    pub min_total_mb: u64,
    pub max_total_mb: u64,
}

impl CandidateFilter {
    #[must_use]
    pub const fn from_config(config: &VolumeConfig) -> Self {
        Self {
            min_total_mb: config.min_size_mb,
            max_total_mb: config.max_size_mb,
        }
    }

    pub fn check(&self, record: &VolumeRecord) -> std::result::Result<(), RejectReason> {
        if record
            .drive_letter
            .as_deref()
            .is_some_and(|letter| !letter.trim().is_empty())
        {
            return Err(RejectReason::HasDriveLetter);
        }
        if record.backing == DiskBacking::Physical {
            return Err(RejectReason::PhysicalDisk);
        }
        let total = record.total_mb();
        if total < self.min_total_mb || total == 0 {
            return Err(RejectReason::TooSmall);
        }
        if total > self.max_total_mb {
            return Err(RejectReason::TooLarge);
        }
        Ok(())
    }

    /// Candidates in source order plus the rejected ids and reasons.
    #[must_use]
    pub fn apply(&self, records: &[VolumeRecord]) -> (Vec<CandidateVolume>, Vec<(String, RejectReason)>) {
        let mut kept = Vec::new();
        let mut rejected = Vec::new();
        for record in records {
            match self.check(record) {
                Ok(()) => kept.push(record.to_candidate()),
                Err(reason) => rejected.push((record.id.clone(), reason)),
            }
        }
        (kept, rejected)
    }
}

/// One way of enumerating mounted volumes.
pub trait VolumeProvider: Provider + Send + Sync {
    /// `Ok(None)` when the provider is not applicable here.
    fn enumerate(&self) -> Result<Option<Vec<VolumeRecord>>>;
}

// ──────────────────── storage cmdlets ────────────────────

const STORAGE_SCRIPT: &str = r"$ErrorActionPreference = 'Stop'
Get-Disk | Where-Object { $_.BusType -eq 'File Backed Virtual' } | ForEach-Object {
  $disk = $_
  Get-Partition -DiskNumber $disk.Number -ErrorAction SilentlyContinue |
    Get-Volume -ErrorAction SilentlyContinue | ForEach-Object {
      [pscustomobject]@{
        Path = $_.Path
        FileSystemLabel = $_.FileSystemLabel
        DriveLetter = if ($_.DriveLetter) { [string]$_.DriveLetter } else { $null }
        Size = [uint64]$_.Size
        SizeRemaining = [uint64]$_.SizeRemaining
        BusType = [string]$disk.BusType
      }
    }
} | ConvertTo-Json -Compress";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StorageRow {
    path: String,
    #[serde(default)]
    file_system_label: Option<String>,
    #[serde(default)]
    drive_letter: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    size_remaining: u64,
    #[serde(default)]
    bus_type: Option<String>,
}

/// `ConvertTo-Json` emits a bare object for one row and an array otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(rows) => rows,
            Self::One(row) => vec![row],
        }
    }
}

fn parse_rows<T: for<'de> Deserialize<'de>>(stdout: &str) -> std::result::Result<Vec<T>, serde_json::Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<OneOrMany<T>>(trimmed).map(OneOrMany::into_vec)
}

/// Parse the storage-cmdlet script output.
pub fn parse_storage_output(stdout: &str) -> Result<Vec<VolumeRecord>> {
    let rows: Vec<StorageRow> = parse_rows(stdout).map_err(|error| CqsError::VolumeEnumeration {
        source_name: "storage".to_string(),
        details: format!("unparseable output: {error}"),
    })?;
    Ok(rows
        .into_iter()
        .map(|row| VolumeRecord {
            id: row.path,
            label: row.file_system_label.unwrap_or_default(),
            drive_letter: row.drive_letter.filter(|l| !l.trim().is_empty()),
            size_bytes: row.size,
            free_bytes: row.size_remaining,
            backing: match row.bus_type.as_deref() {
                Some("File Backed Virtual") => DiskBacking::Virtual,
                Some(_) => DiskBacking::Physical,
                None => DiskBacking::Unknown,
            },
        })
        .collect())
}

/// Virtual-disk volumes via `Get-Disk` / `Get-Partition` / `Get-Volume`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageModuleProvider;

impl Provider for StorageModuleProvider {
    fn name(&self) -> &str {
        "storage"
    }
}

impl VolumeProvider for StorageModuleProvider {
    fn enumerate(&self) -> Result<Option<Vec<VolumeRecord>>> {
        let output = run_powershell(STORAGE_SCRIPT)?;
        if !output.success {
            return Err(CqsError::VolumeEnumeration {
                source_name: self.name().to_string(),
                details: output.failure_summary(),
            });
        }
        parse_storage_output(&output.stdout).map(Some)
    }
}

// ──────────────────── legacy WMI ────────────────────

const WMI_SCRIPT: &str = r"$ErrorActionPreference = 'Stop'
Get-CimInstance -ClassName Win32_Volume -Filter 'DriveType = 3' |
  Select-Object DeviceID, Label, DriveLetter, Capacity, FreeSpace |
  ConvertTo-Json -Compress";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WmiRow {
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    drive_letter: Option<String>,
    #[serde(default)]
    capacity: Option<u64>,
    #[serde(default)]
    free_space: Option<u64>,
}

/// Parse the `Win32_Volume` script output. Backing is unknown at this level.
pub fn parse_wmi_output(stdout: &str) -> Result<Vec<VolumeRecord>> {
    let rows: Vec<WmiRow> = parse_rows(stdout).map_err(|error| CqsError::VolumeEnumeration {
        source_name: "wmi".to_string(),
        details: format!("unparseable output: {error}"),
    })?;
    Ok(rows
        .into_iter()
        .map(|row| VolumeRecord {
            id: row.device_id,
            label: row.label.unwrap_or_default(),
            drive_letter: row.drive_letter.filter(|l| !l.trim().is_empty()),
            size_bytes: row.capacity.unwrap_or(0),
            free_bytes: row.free_space.unwrap_or(0),
            backing: DiskBacking::Unknown,
        })
        .collect())
}

/// All fixed volumes via `Win32_Volume`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyWmiProvider;

impl Provider for LegacyWmiProvider {
    fn name(&self) -> &str {
        "wmi"
    }
}

impl VolumeProvider for LegacyWmiProvider {
    fn enumerate(&self) -> Result<Option<Vec<VolumeRecord>>> {
        let output = run_powershell(WMI_SCRIPT)?;
        if !output.success {
            return Err(CqsError::VolumeEnumeration {
                source_name: self.name().to_string(),
                details: output.failure_summary(),
            });
        }
        parse_wmi_output(&output.stdout).map(Some)
    }
}

// ──────────────────── inventory file ────────────────────

/// Volumes listed in a JSON file, for hosts without the cmdlets and for tests.
#[derive(Debug, Clone, Default)]
pub struct InventoryFileProvider {
    path: Option<PathBuf>,
}

impl InventoryFileProvider {
    #[must_use]
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Provider for InventoryFileProvider {
    fn name(&self) -> &str {
        "inventory"
    }
}

impl VolumeProvider for InventoryFileProvider {
    fn enumerate(&self) -> Result<Option<Vec<VolumeRecord>>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let raw = fs::read_to_string(path).map_err(|source| CqsError::io(path, source))?;
        let records: Vec<VolumeRecord> = parse_rows(&raw).map_err(|error| CqsError::VolumeEnumeration {
            source_name: self.name().to_string(),
            details: format!("{}: {error}", path.display()),
        })?;
        Ok(Some(records))
    }
}

// ──────────────────── source ────────────────────

/// Result of one enumeration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeListing {
    pub candidates: Vec<CandidateVolume>,
    /// Provider that answered; `None` when every provider failed or declined.
    pub source: Option<String>,
    pub total_records: usize,
    pub rejected: Vec<(String, RejectReason)>,
    pub failures: Vec<ChainFailure>,
}

/// Ordered volume providers plus the candidate filter.
pub struct VolumeSource {
    providers: Vec<Box<dyn VolumeProvider>>,
    filter: CandidateFilter,
}

impl VolumeSource {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn VolumeProvider>>, filter: CandidateFilter) -> Self {
        Self { providers, filter }
    }

    #[must_use]
    pub fn from_config(config: &VolumeConfig) -> Self {
        let providers = config
            .sources
            .iter()
            .filter_map(|name| -> Option<Box<dyn VolumeProvider>> {
                match name.as_str() {
                    "storage" => Some(Box::new(StorageModuleProvider)),
                    "wmi" => Some(Box::new(LegacyWmiProvider)),
                    "inventory" => Some(Box::new(InventoryFileProvider::new(config.inventory_file.clone()))),
                    _ => None,
                }
            })
            .collect();
        Self::new(providers, CandidateFilter::from_config(config))
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Candidate volumes in provider order. Never fails: an exhausted chain
    /// yields an empty listing.
    #[must_use]
    pub fn list(&self) -> VolumeListing {
        let outcome = first_success(&self.providers, |p| p.enumerate());
        let records = outcome.value.unwrap_or_default();
        let (candidates, rejected) = self.filter.apply(&records);
        VolumeListing {
            candidates,
            source: outcome.source,
            total_records: records.len(),
            rejected,
            failures: outcome.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GIB: u64 = 1024 * MIB;

    fn filter() -> CandidateFilter {
        CandidateFilter::from_config(&VolumeConfig::default())
    }

    fn record(id: &str, letter: Option<&str>, size_gib: u64, backing: DiskBacking) -> VolumeRecord {
        VolumeRecord {
            id: id.to_string(),
            label: String::new(),
            drive_letter: letter.map(ToString::to_string),
            size_bytes: size_gib * GIB,
            free_bytes: GIB,
            backing,
        }
    }

    #[test]
    fn storage_output_single_object() {
        let out = r#"{"Path":"\\\\?\\Volume{aa}\\","FileSystemLabel":"Profile-jdoe","DriveLetter":null,"Size":32212254720,"SizeRemaining":10737418240,"BusType":"File Backed Virtual"}"#;
        let records = parse_storage_output(out).expect("parses");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "Profile-jdoe");
        assert_eq!(records[0].backing, DiskBacking::Virtual);
        assert_eq!(records[0].total_mb(), 30_720);
        assert_eq!(records[0].used_mb(), 20_480);
    }

    #[test]
    fn storage_output_array_and_empty() {
        let out = r#"[{"Path":"a","Size":1,"SizeRemaining":0,"BusType":"SATA","DriveLetter":"C"},{"Path":"b","Size":2,"SizeRemaining":1}]"#;
        let records = parse_storage_output(out).expect("parses");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].backing, DiskBacking::Physical);
        assert_eq!(records[0].drive_letter.as_deref(), Some("C"));
        assert_eq!(records[1].backing, DiskBacking::Unknown);
        assert!(parse_storage_output("  \r\n").expect("empty ok").is_empty());
    }

    #[test]
    fn storage_output_garbage_is_an_error() {
        let err = parse_storage_output("Get-Disk : access denied").expect_err("not json");
        assert_eq!(err.code(), "CQS-2002");
    }

    #[test]
    fn wmi_output_maps_fields() {
        let out = r#"[{"DeviceID":"\\\\?\\Volume{bb}\\","Label":null,"DriveLetter":"D:","Capacity":1073741824,"FreeSpace":536870912},{"DeviceID":"x","Label":"ODFC","DriveLetter":null,"Capacity":null,"FreeSpace":null}]"#;
        let records = parse_wmi_output(out).expect("parses");
        assert_eq!(records[0].drive_letter.as_deref(), Some("D:"));
        assert_eq!(records[0].label, "");
        assert_eq!(records[1].label, "ODFC");
        assert_eq!(records[1].size_bytes, 0);
        assert!(records.iter().all(|r| r.backing == DiskBacking::Unknown));
    }

    #[test]
    fn filter_rejects_lettered_physical_and_out_of_band() {
        let f = filter();
        assert_eq!(f.check(&record("a", None, 30, DiskBacking::Virtual)), Ok(()));
        assert_eq!(f.check(&record("b", None, 30, DiskBacking::Unknown)), Ok(()));
        assert_eq!(
            f.check(&record("c", Some("E"), 30, DiskBacking::Virtual)),
            Err(RejectReason::HasDriveLetter)
        );
        assert_eq!(
            f.check(&record("d", None, 30, DiskBacking::Physical)),
            Err(RejectReason::PhysicalDisk)
        );
        assert_eq!(f.check(&record("e", None, 0, DiskBacking::Virtual)), Err(RejectReason::TooSmall));
        assert_eq!(
            f.check(&record("f", None, 4096, DiskBacking::Virtual)),
            Err(RejectReason::TooLarge)
        );
        assert_eq!(f.check(&record("g", Some(" "), 30, DiskBacking::Virtual)), Ok(()));
    }

    #[test]
    fn filter_keeps_source_order() {
        let records = vec![
            record("one", None, 30, DiskBacking::Virtual),
            record("sys", Some("C"), 100, DiskBacking::Physical),
            record("two", None, 5, DiskBacking::Virtual),
        ];
        let (kept, rejected) = filter().apply(&records);
        let ids: Vec<_> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(rejected, vec![("sys".to_string(), RejectReason::HasDriveLetter)]);
    }

    #[test]
    fn inventory_without_path_declines() {
        let provider = InventoryFileProvider::new(None);
        assert!(provider.enumerate().expect("no error").is_none());
    }

    #[test]
    fn inventory_reads_records() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{"id":"vol-1","label":"Profile","size_bytes":{},"free_bytes":{}}}]"#,
            20 * GIB,
            4 * GIB
        )
        .expect("write");
        let provider = InventoryFileProvider::new(Some(file.path().to_path_buf()));
        let records = provider.enumerate().expect("reads").expect("answers");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].used_mb(), 16 * 1024);
        assert_eq!(records[0].backing, DiskBacking::Unknown);
    }

    #[test]
    fn inventory_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = InventoryFileProvider::new(Some(dir.path().join("absent.json")));
        let err = provider.enumerate().expect_err("missing file");
        assert_eq!(err.code(), "CQS-3002");
    }

    #[test]
    fn source_falls_through_to_inventory() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"id":"vol-1","size_bytes":{},"free_bytes":0,"backing":"virtual"}}"#,
            10 * GIB
        )
        .expect("write");
        let config = VolumeConfig {
            sources: vec!["storage".to_string(), "wmi".to_string(), "inventory".to_string()],
            inventory_file: Some(file.path().to_path_buf()),
            ..VolumeConfig::default()
        };
        let source = VolumeSource::from_config(&config);
        let listing = source.list();
        assert_eq!(listing.source.as_deref(), Some("inventory"));
        assert_eq!(listing.candidates.len(), 1);
        assert_eq!(listing.candidates[0].total_mb, 10 * 1024);
        if !cfg!(windows) {
            assert_eq!(listing.failures.len(), 2);
        }
    }

    #[test]
    fn exhausted_chain_is_empty_listing() {
        let source = VolumeSource::new(vec![Box::new(InventoryFileProvider::new(None))], filter());
        let listing = source.list();
        assert!(listing.candidates.is_empty());
        assert!(listing.source.is_none());
        assert_eq!(listing.total_records, 0);
    }
}
