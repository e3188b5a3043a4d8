//! User notifications: message type, backend chain and delivery reporting.
//!
//! Backends are asked in the configured order and the first one that delivers
//! ends the walk. A backend that is unavailable on this host declines; one that
//! tried and broke fails. Either way the next backend gets its turn.

#![allow(missing_docs)]

pub mod backends;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::fallback::{ChainFailure, Provider, first_success};
use crate::core::errors::Result;

pub use backends::{ConsoleBackend, DesktopBackend, FileBackend, MsgBackend, ToastBackend};

/// Every backend name accepted in `notifications.backends`.
pub const BACKEND_NAMES: [&str; 5] = ["toast", "msg", "desktop", "file", "console"];

// ──────────────────── message ────────────────────

/// How loudly to present a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Warning,
    Critical,
}

impl fmt::Display for NotificationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A message for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: NotificationSeverity,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>, severity: NotificationSeverity) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
        }
    }
}

// ──────────────────── configuration ────────────────────

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch. When off, every send is reported as not delivered.
    pub enabled: bool,
    /// Backend names in the order they are tried.
    pub backends: Vec<String>,
    pub toast: ToastConfig,
    pub msg: MsgConfig,
    pub file: FileConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backends: ["toast", "msg", "desktop", "console"]
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            toast: ToastConfig::default(),
            msg: MsgConfig::default(),
            file: FileConfig::default(),
        }
    }
}

/// Windows toast settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToastConfig {
    /// AppUserModelID the toast is attributed to.
    pub app_id: String,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            app_id: "Microsoft.Windows.Explorer".to_string(),
        }
    }
}

/// Terminal-services message box settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MsgConfig {
    /// Seconds before the message box closes on its own.
    pub timeout_secs: u32,
}

impl Default for MsgConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// Append-only JSONL notification log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::data_dir().join("notifications.jsonl"),
        }
    }
}

// ──────────────────── backends and sinks ────────────────────

/// What a backend did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Not available on this host; try the next backend.
    Unavailable,
}

/// One way of showing a notification to the user.
pub trait NotificationBackend: Provider + Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<Delivery>;
}

/// Outcome of a [`NotificationSink::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: bool,
    /// Backend that delivered.
    pub backend: Option<String>,
    /// Backends that were unavailable, in the order tried.
    pub unavailable: Vec<String>,
    pub failures: Vec<ChainFailure>,
}

impl DeliveryReport {
    /// Report for a send that was never attempted.
    #[must_use]
    pub const fn not_attempted() -> Self {
        Self {
            delivered: false,
            backend: None,
            unavailable: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Anything that can deliver a notification to the user.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &Notification) -> DeliveryReport;

    /// Names of the backends `send` will try, in order.
    fn backend_names(&self) -> Vec<&str>;
}

/// Ordered backends; the first to deliver wins.
pub struct BackendChain {
    backends: Vec<Box<dyn NotificationBackend>>,
    enabled: bool,
}

impl BackendChain {
    #[must_use]
    pub fn new(backends: Vec<Box<dyn NotificationBackend>>) -> Self {
        Self {
            backends,
            enabled: true,
        }
    }

    /// Build the chain named in `config.backends`.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let backends = config
            .backends
            .iter()
            .filter_map(|name| -> Option<Box<dyn NotificationBackend>> {
                match name.as_str() {
                    "toast" => Some(Box::new(ToastBackend::new(&config.toast))),
                    "msg" => Some(Box::new(MsgBackend::new(&config.msg))),
                    "desktop" => Some(Box::new(DesktopBackend)),
                    "file" => Some(Box::new(FileBackend::new(&config.file))),
                    "console" => Some(Box::new(ConsoleBackend::detect())),
                    _ => None,
                }
            })
            .collect();

        Self::new(backends)
    }

    /// A chain that never delivers.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            backends: Vec::new(),
            enabled: false,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl NotificationSink for BackendChain {
    fn send(&self, notification: &Notification) -> DeliveryReport {
        if !self.enabled {
            return DeliveryReport::not_attempted();
        }

        let outcome = first_success(&self.backends, |backend| {
            backend
                .deliver(notification)
                .map(|delivery| (delivery == Delivery::Delivered).then_some(()))
        });

        DeliveryReport {
            delivered: outcome.is_answered(),
            backend: outcome.source,
            unavailable: outcome.declined,
            failures: outcome.failures,
        }
    }

    fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: parking_lot::Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records but reports every send as undelivered.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn send(&self, notification: &Notification) -> DeliveryReport {
        self.sent.lock().push(notification.clone());
        if self.fail {
            DeliveryReport {
                delivered: false,
                backend: None,
                unavailable: Vec::new(),
                failures: vec![ChainFailure {
                    provider: "recording".to_string(),
                    code: "CQS-2003",
                    message: "recording sink configured to fail".to_string(),
                }],
            }
        } else {
            DeliveryReport {
                delivered: true,
                backend: Some("recording".to_string()),
                unavailable: Vec::new(),
                failures: Vec::new(),
            }
        }
    }

    fn backend_names(&self) -> Vec<&str> {
        vec!["recording"]
    }
}
