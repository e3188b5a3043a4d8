//! Concrete notification backends.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::core::errors::{CqsError, Result};
use crate::core::fallback::Provider;
use crate::notify::{
    Delivery, FileConfig, MsgConfig, Notification, NotificationBackend, NotificationSeverity,
    ToastConfig,
};
use crate::platform::command::{powershell_quote, run_capture, run_powershell};

// ──── Toast (WinRT via PowerShell) ────

pub struct ToastBackend {
    app_id: String,
}

impl ToastBackend {
    #[must_use]
    pub fn new(config: &ToastConfig) -> Self {
        Self {
            app_id: config.app_id.clone(),
        }
    }

    /// PowerShell that shows `notification` as a toast.
    #[must_use]
    pub fn render_script(&self, notification: &Notification) -> String {
        let scenario = match notification.severity {
            NotificationSeverity::Critical => " scenario=\"reminder\"",
            NotificationSeverity::Warning => "",
        };
        let xml = format!(
            "<toast{scenario}><visual><binding template=\"ToastGeneric\"><text>{}</text><text>{}</text></binding></visual></toast>",
            xml_escape(&notification.title),
            xml_escape(&notification.body),
        );
        format!(
            "$ErrorActionPreference = 'Stop'\n\
             [Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null\n\
             [Windows.Data.Xml.Dom.XmlDocument, Windows.Data.Xml.Dom.XmlDocument, ContentType = WindowsRuntime] | Out-Null\n\
             $xml = New-Object Windows.Data.Xml.Dom.XmlDocument\n\
             $xml.LoadXml({})\n\
             $toast = New-Object Windows.UI.Notifications.ToastNotification $xml\n\
             [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier({}).Show($toast)",
            powershell_quote(&xml),
            powershell_quote(&self.app_id),
        )
    }
}

impl Provider for ToastBackend {
    fn name(&self) -> &str {
        "toast"
    }
}

impl NotificationBackend for ToastBackend {
    fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        if !cfg!(windows) {
            return Ok(Delivery::Unavailable);
        }
        let output = run_powershell(&self.render_script(notification))?;
        if output.success {
            Ok(Delivery::Delivered)
        } else {
            Err(CqsError::NotificationDelivery {
                backend: "toast",
                details: output.failure_summary(),
            })
        }
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

// ──── Message box (msg.exe) ────

pub struct MsgBackend {
    timeout_secs: u32,
}

impl MsgBackend {
    #[must_use]
    pub const fn new(config: &MsgConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
        }
    }

    /// Arguments for `msg.exe`, addressed to `recipient`.
    #[must_use]
    pub fn render_args(&self, recipient: &str, notification: &Notification) -> Vec<String> {
        vec![
            recipient.to_string(),
            format!("/TIME:{}", self.timeout_secs),
            format!("{}\n\n{}", notification.title, notification.body),
        ]
    }
}

impl Provider for MsgBackend {
    fn name(&self) -> &str {
        "msg"
    }
}

impl NotificationBackend for MsgBackend {
    fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        if !cfg!(windows) {
            return Ok(Delivery::Unavailable);
        }
        let username = std::env::var("USERNAME").ok();
        let Some(recipient) = msg_recipient(username.as_deref()) else {
            return Ok(Delivery::Unavailable);
        };
        let args = self.render_args(recipient, notification);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = run_capture("msg", &args)?;
        if output.success {
            Ok(Delivery::Delivered)
        } else {
            Err(CqsError::NotificationDelivery {
                backend: "msg",
                details: output.failure_summary(),
            })
        }
    }
}

/// The session user to address, never a broadcast target.
fn msg_recipient(username: Option<&str>) -> Option<&str> {
    let name = username?.trim();
    if name.is_empty() || name.contains(['*', '@']) || name.starts_with('/') {
        return None;
    }
    Some(name)
}

// ──── Desktop (notify-send / osascript) ────

pub struct DesktopBackend;

impl Provider for DesktopBackend {
    fn name(&self) -> &str {
        "desktop"
    }
}

impl NotificationBackend for DesktopBackend {
    fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        let urgency = match notification.severity {
            NotificationSeverity::Critical => "critical",
            NotificationSeverity::Warning => "normal",
        };

        let output = if cfg!(target_os = "linux") {
            run_capture(
                "notify-send",
                &[
                    "--urgency",
                    urgency,
                    "--app-name=cqs",
                    &notification.title,
                    &notification.body,
                ],
            )
        } else if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                notification.body.replace('"', "\\\""),
                notification.title.replace('"', "\\\""),
            );
            run_capture("osascript", &["-e", &script])
        } else {
            return Ok(Delivery::Unavailable);
        };

        match output {
            Ok(out) if out.success => Ok(Delivery::Delivered),
            Ok(out) => Err(CqsError::NotificationDelivery {
                backend: "desktop",
                details: out.failure_summary(),
            }),
            // Helper not installed.
            Err(CqsError::Command { .. }) => Ok(Delivery::Unavailable),
            Err(other) => Err(other),
        }
    }
}

// ──── File (append-only JSONL) ────

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    ts: String,
    severity: NotificationSeverity,
    title: &'a str,
    body: &'a str,
}

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    #[must_use]
    pub fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

impl Provider for FileBackend {
    fn name(&self) -> &str {
        "file"
    }
}

impl NotificationBackend for FileBackend {
    fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            severity: notification.severity,
            title: &notification.title,
            body: &notification.body,
        };
        let json = serde_json::to_string(&record)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CqsError::io(parent, source))?;
        }

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o600);
        }
        let mut file = opts
            .open(&self.path)
            .map_err(|source| CqsError::io(&self.path, source))?;
        writeln!(file, "{json}").map_err(|source| CqsError::io(&self.path, source))?;
        Ok(Delivery::Delivered)
    }
}

// ──── Console (stderr) ────

/// Prints to stderr. Counts as delivered only when stderr is a terminal.
pub struct ConsoleBackend {
    attended: bool,
}

impl ConsoleBackend {
    #[must_use]
    pub const fn new(attended: bool) -> Self {
        Self { attended }
    }

    /// Attended when stderr is a terminal.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(io::stderr().is_terminal())
    }

    #[must_use]
    pub fn render(notification: &Notification) -> String {
        let tag = match notification.severity {
            NotificationSeverity::Critical => "CRITICAL",
            NotificationSeverity::Warning => "WARNING",
        };
        format!(
            "[CQS-NOTIFY] [{tag}] {}: {}",
            notification.title,
            notification.body.replace('\n', " | ")
        )
    }
}

impl Provider for ConsoleBackend {
    fn name(&self) -> &str {
        "console"
    }
}

impl NotificationBackend for ConsoleBackend {
    fn deliver(&self, notification: &Notification) -> Result<Delivery> {
        if !self.attended {
            return Ok(Delivery::Unavailable);
        }
        eprintln!("{}", Self::render(notification));
        Ok(Delivery::Delivered)
    }
}
