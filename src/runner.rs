use anyhow::{Context, Result};
use std::process::{Command, ExitStatus, Stdio};

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command and inherit stdio (shows output in real-time)
pub fn run(cmd: &str, args: &[&str]) -> Result<ExitStatus> {
    log::debug!("exec: {} {}", cmd, args.join(" "));
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Run a command and capture output, failing on a non-zero exit
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let output = run_output(cmd, args)?;
    if output.success {
        Ok(output.stdout)
    } else {
        anyhow::bail!("Command failed: {}", output.stderr)
    }
}

/// Run a command and capture both streams, whatever the exit status
pub fn run_output(cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    log::debug!("exec: {} {}", cmd, args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_output_captures_streams() {
        let out = run_output("sh", &["-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert!(!out.success);
        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
    }

    #[test]
    fn test_run_capture_fails_on_nonzero() {
        assert_eq!(run_capture("sh", &["-c", "echo ok"]).unwrap(), "ok");
        assert!(run_capture("sh", &["-c", "exit 1"]).is_err());
    }

    #[test]
    fn test_missing_command() {
        assert!(run_output("definitely-not-a-real-binary-xyz", &[]).is_err());
        assert!(!command_exists("definitely-not-a-real-binary-xyz"));
    }
}
