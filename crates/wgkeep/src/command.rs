//! Argument-validated execution of the `WireGuard` userspace tools.
//!
//! Programs come from a fixed allowlist and are launched directly, never
//! through a shell. Arguments containing NUL or line breaks are refused
//! before anything is spawned.

use std::fmt;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::error::{Result, WgkeepError};

/// Programs the tunnel adapter is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedProgram {
    /// `wg`, the configuration and inspection tool.
    Wg,
    /// `wg-quick`, which brings interfaces up and down from a config file.
    WgQuick,
}

impl AllowedProgram {
    /// Default program name looked up on `PATH`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wg => "wg",
            Self::WgQuick => "wg-quick",
        }
    }
}

impl fmt::Display for AllowedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r'];

fn validate_argument(arg: &str) -> Result<()> {
    match arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        Some(c) => Err(WgkeepError::InvalidArgument(format!(
            "command argument contains forbidden character {c:?}"
        ))),
        None => Ok(()),
    }
}

fn validate_program_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(WgkeepError::InvalidArgument("empty program path".to_string()));
    }
    if path
        .chars()
        .any(|c| FORBIDDEN_CHARS.contains(&c) || matches!(c, ';' | '&' | '|' | '$' | '`'))
    {
        return Err(WgkeepError::ToolUnavailable {
            program: path.to_string(),
            message: "program path contains shell metacharacters".to_string(),
        });
    }
    Ok(())
}

/// Output from a successful command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Get stdout as a UTF-8 string, replacing invalid characters.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A command builder that validates every input before running.
#[derive(Debug)]
pub struct ToolCommand {
    program: AllowedProgram,
    program_path: Option<String>,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    errors: Vec<WgkeepError>,
}

impl ToolCommand {
    /// Create a new command for the given program.
    #[must_use]
    pub fn new(program: AllowedProgram) -> Self {
        Self {
            program,
            program_path: None,
            args: Vec::new(),
            stdin: None,
            errors: Vec::new(),
        }
    }

    /// Use a custom path for the program instead of searching `PATH`.
    #[must_use]
    pub fn with_program_path(mut self, path: &str) -> Self {
        match validate_program_path(path) {
            Ok(()) => self.program_path = Some(path.to_string()),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        let arg = arg.as_ref();
        match validate_argument(arg) {
            Ok(()) => self.args.push(arg.to_string()),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Bytes written to the child's standard input, which is then closed.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn program(&self) -> &str {
        self.program_path.as_deref().unwrap_or(self.program.as_str())
    }

    /// Command line for logs and error messages.
    #[must_use]
    pub fn description(&self) -> String {
        if self.args.is_empty() {
            self.program().to_string()
        } else {
            format!("{} {}", self.program(), self.args.join(" "))
        }
    }

    /// Runs the command to completion.
    ///
    /// # Errors
    ///
    /// Returns the first validation error collected while building,
    /// `ToolUnavailable` if the program cannot be launched, and
    /// `CommandFailed` on a non-zero exit.
    pub async fn execute(mut self) -> Result<CommandOutput> {
        if !self.errors.is_empty() {
            return Err(self.errors.swap_remove(0));
        }

        let description = self.description();
        debug!(command = %description, "running tool");

        let mut cmd = TokioCommand::new(self.program());
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| WgkeepError::ToolUnavailable {
            program: self.program().to_string(),
            message: e.to_string(),
        })?;

        if let Some(input) = self.stdin.take() {
            if let Some(mut pipe) = child.stdin.take() {
                let written = match pipe.write_all(&input).await {
                    Ok(()) => pipe.shutdown().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    if let Err(kill) = child.kill().await {
                        debug!(command = %description, error = %kill, "child already gone");
                    }
                    return Err(WgkeepError::io(self.program(), e));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| WgkeepError::io(self.program(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WgkeepError::command_failed(
                description,
                output.status.code().unwrap_or(-1),
                stderr,
            ));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_joins_args() {
        let cmd = ToolCommand::new(AllowedProgram::Wg).args(["show", "wg0", "dump"]);
        assert_eq!(cmd.description(), "wg show wg0 dump");
    }

    #[test]
    fn custom_path_used_in_description() {
        let cmd = ToolCommand::new(AllowedProgram::WgQuick)
            .with_program_path("/usr/local/bin/wg-quick")
            .arg("up");
        assert_eq!(cmd.description(), "/usr/local/bin/wg-quick up");
    }

    #[tokio::test]
    async fn newline_in_argument_is_refused_before_spawn() {
        let result = ToolCommand::new(AllowedProgram::Wg)
            .arg("show\nwg0")
            .execute()
            .await;
        assert!(matches!(result, Err(WgkeepError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn shell_metacharacters_in_program_path_refused() {
        let result = ToolCommand::new(AllowedProgram::Wg)
            .with_program_path("wg; rm -rf /")
            .execute()
            .await;
        assert!(matches!(result, Err(WgkeepError::ToolUnavailable { .. })));
    }

    #[tokio::test]
    async fn missing_program_is_tool_unavailable() {
        let result = ToolCommand::new(AllowedProgram::Wg)
            .with_program_path("/nonexistent/wgkeep-test-wg")
            .arg("show")
            .execute()
            .await;
        assert!(matches!(result, Err(WgkeepError::ToolUnavailable { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unread_stdin_fails_without_hanging() {
        let input = vec![b'x'; 1 << 20];
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            ToolCommand::new(AllowedProgram::Wg)
                .with_program_path("true")
                .stdin(input)
                .execute(),
        )
        .await
        .expect("finishes");
        assert!(matches!(result, Err(WgkeepError::Io { .. })));
    }
}
