//! Action executor
//!
//! Runs a single rule: executability check, optional delay, spawn, outcome
//! log. Each dispatch is an independently schedulable unit of work; the
//! delay is an async sleep, so one slow rule never stalls another dispatch
//! or the hotplug poll loop. A failed action is logged once and never
//! retried.

use crate::sink::LogSink;
use crate::store::ActionRule;
use nix::unistd::{AccessFlags, access};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result of dispatching one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Child exited with status 0.
    Success(i32),
    /// Child failed or could not be spawned.
    Failure(FailureKind),
    /// Script path failed the executability check; nothing was spawned.
    NotExecutable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-zero exit code.
    Exit(i32),
    /// Child was terminated by a signal.
    Signal,
    /// exec itself failed (binary vanished, permission denied at exec time).
    Spawn(std::io::ErrorKind),
}

/// Dispatch one rule and log its outcome.
///
/// Child stdout/stderr are discarded; script output never reaches the log
/// sink, only the one-line outcome summary does.
pub async fn dispatch(rule: &ActionRule, log: &LogSink) -> ExecutionOutcome {
    let script = rule.script.display();

    if !is_executable(&rule.script) {
        log.emit(format!("script '{script}' is not executable, skipping"));
        return ExecutionOutcome::NotExecutable;
    }

    if rule.delay_sec > 0 {
        log.emit(format!("delaying {}s before '{script}'", rule.delay_sec));
        tokio::time::sleep(Duration::from_secs(rule.delay_sec)).await;
    }

    let status = Command::new(&rule.script)
        .args(&rule.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => match status.code() {
            Some(0) => {
                log.emit(format!("action '{script}' completed successfully"));
                ExecutionOutcome::Success(0)
            }
            Some(code) => {
                log.emit(format!("action '{script}' failed with exit code {code}"));
                ExecutionOutcome::Failure(FailureKind::Exit(code))
            }
            None => {
                log.emit(format!("action '{script}' was terminated by a signal"));
                ExecutionOutcome::Failure(FailureKind::Signal)
            }
        },
        Err(e) => {
            log.emit(format!("failed to launch '{script}': {e}"));
            ExecutionOutcome::Failure(FailureKind::Spawn(e.kind()))
        }
    }
}

/// Executable by the invoking principal, per access(2) with X_OK.
fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_script_is_not_executable() {
        assert!(!is_executable(Path::new("/nonexistent/script.sh")));
    }

    #[test]
    fn system_shell_is_executable() {
        assert!(is_executable(Path::new("/bin/sh")));
    }
}
