//! Cooldown gate: suppresses repeat notifications inside a rolling window.
//!
//! The only state that survives between runs is the instant of the last
//! dispatched notification. Missing, unreadable or implausible state opens the
//! gate: a broken store must never silence warnings for good.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CqsError, Result};

/// Stored timestamps further in the future than this are treated as corrupt.
const CLOCK_SKEW_ALLOWANCE_MINUTES: i64 = 5;

/// Longest accepted window (one leap year).
const MAX_WINDOW_HOURS: f64 = 24.0 * 366.0;

/// Persistence for the single last-notified timestamp.
pub trait CooldownStore: Send + Sync {
    /// `Ok(None)` when nothing was ever recorded.
    fn read(&self) -> Result<Option<DateTime<Utc>>>;
    fn write(&self, at: DateTime<Utc>) -> Result<()>;
    /// Forget the recorded timestamp.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownDocument {
    last_notified_at: DateTime<Utc>,
}

/// JSON document on disk, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileCooldownStore {
    path: PathBuf,
}

impl FileCooldownStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CooldownStore for FileCooldownStore {
    fn read(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(CqsError::io(&self.path, error)),
        };
        let doc: CooldownDocument =
            serde_json::from_str(&raw).map_err(|error| CqsError::CooldownState {
                path: self.path.clone(),
                details: error.to_string(),
            })?;
        Ok(Some(doc.last_notified_at))
    }

    fn write(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CqsError::io(parent, source))?;
        }
        let data = serde_json::to_vec_pretty(&CooldownDocument { last_notified_at: at })?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, data).map_err(|source| CqsError::io(&tmp_path, source))?;
        fs::rename(&tmp_path, &self.path).map_err(|source| CqsError::io(&self.path, source))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(CqsError::io(&self.path, error)),
        }
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    value: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCooldownStore {
    #[must_use]
    pub fn with_value(at: DateTime<Utc>) -> Self {
        Self {
            value: Mutex::new(Some(at)),
        }
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn read(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.value.lock())
    }

    fn write(&self, at: DateTime<Utc>) -> Result<()> {
        *self.value.lock() = Some(at);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.lock() = None;
        Ok(())
    }
}

/// Gate state at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// Notifications may go out.
    Clear {
        reason: ClearReason,
    },
    /// Inside the window that started at `last_notified_at`.
    Suppressed {
        last_notified_at: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

/// Why the gate is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    NeverNotified,
    WindowElapsed,
    Override,
    Disabled,
    UnreadableState,
    FutureTimestamp,
}

/// Time-window suppressor around a [`CooldownStore`].
pub struct CooldownGate<'a> {
    store: &'a dyn CooldownStore,
    window: Duration,
    override_active: bool,
}

impl<'a> CooldownGate<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CooldownStore, window: Duration, override_active: bool) -> Self {
        Self {
            store,
            window,
            override_active,
        }
    }

    /// Window given in (possibly fractional) hours.
    #[must_use]
    pub fn from_hours(store: &'a dyn CooldownStore, window_hours: f64, override_active: bool) -> Self {
        Self::new(store, hours_to_duration(window_hours), override_active)
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub const fn override_active(&self) -> bool {
        self.override_active
    }

    /// Gate state at `now`. A store read failure is reported alongside a
    /// `Clear` state, never as an error.
    pub fn evaluate(&self, now: DateTime<Utc>) -> (GateState, Option<CqsError>) {
        if self.override_active {
            return (clear(ClearReason::Override), None);
        }
        if self.window <= Duration::zero() {
            return (clear(ClearReason::Disabled), None);
        }

        let last = match self.store.read() {
            Ok(Some(last)) => last,
            Ok(None) => return (clear(ClearReason::NeverNotified), None),
            Err(error) => return (clear(ClearReason::UnreadableState), Some(error)),
        };

        if last > now + Duration::minutes(CLOCK_SKEW_ALLOWANCE_MINUTES) {
            return (clear(ClearReason::FutureTimestamp), None);
        }

        let until = last
            .checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now >= until {
            (clear(ClearReason::WindowElapsed), None)
        } else {
            (
                GateState::Suppressed {
                    last_notified_at: last,
                    until,
                },
                None,
            )
        }
    }

    #[must_use]
    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.evaluate(now).0, GateState::Suppressed { .. })
    }

    /// Time left until the gate clears; zero when already clear.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.evaluate(now).0 {
            GateState::Suppressed { until, .. } => until - now,
            GateState::Clear { .. } => Duration::zero(),
        }
    }

    /// Record a dispatched notification at `now`.
    pub fn arm(&self, now: DateTime<Utc>) -> Result<()> {
        self.store.write(now)
    }
}

const fn clear(reason: ClearReason) -> GateState {
    GateState::Clear { reason }
}

#[allow(clippy::cast_possible_truncation)]
fn hours_to_duration(hours: f64) -> Duration {
    if !hours.is_finite() || hours <= 0.0 {
        return Duration::zero();
    }
    let seconds = (hours.min(MAX_WINDOW_HOURS) * 3600.0).round() as i64;
    Duration::seconds(seconds)
}
