//! Blocking external-command helpers shared by the registry, volume and
//! notification integrations.

#![allow(missing_docs)]

use std::process::Command;

use crate::core::errors::{CqsError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// First non-empty stderr line, or the exit code when stderr is silent.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.stderr
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(
                || format!("exit code {}", self.code.map_or_else(|| "none".to_string(), |c| c.to_string())),
                ToString::to_string,
            )
    }
}

/// Run `program` with `args` and wait for it. Spawn failures are errors; a
/// non-zero exit is reported through [`CommandOutput::success`].
pub fn run_capture(program: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| CqsError::Command {
            command: program.to_string(),
            details: error.to_string(),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a Windows PowerShell script non-interactively.
pub fn run_powershell(script: &str) -> Result<CommandOutput> {
    require_windows("PowerShell")?;
    run_capture(
        "powershell.exe",
        &[
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            script,
        ],
    )
}

/// Fail with `UnsupportedPlatform` outside Windows.
pub fn require_windows(what: &str) -> Result<()> {
    if cfg!(windows) {
        Ok(())
    } else {
        Err(CqsError::UnsupportedPlatform {
            details: format!("{what} is only available on Windows"),
        })
    }
}

/// Quote a value for a single-quoted PowerShell string literal.
#[must_use]
pub fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
