use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::AppError;

/// How to launch an external program: the binary plus any arguments that
/// must precede the real ones (e.g. `python3 -m yt_dlp`).
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ToolCommand {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// A fresh command with the leading arguments applied and stdin closed.
    /// On unix the child gets its own process group.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).stdin(Stdio::null());
        // Keep terminal Ctrl-C away from the child; cancellation goes through the pause flag.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Runs to completion and returns stdout. A non-zero exit becomes
    /// `AppError::Tool` carrying stderr verbatim.
    pub async fn capture<I, S>(&self, args: I) -> Result<String, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = self
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AppError::Tool(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_returns_stdout() {
        let sh = ToolCommand::new("sh").with_args(["-c"]);
        let out = sh.capture(["printf 'a\\nb\\n'"]).await.unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_tool_error_with_stderr() {
        let sh = ToolCommand::new("sh").with_args(["-c"]);
        let err = sh.capture(["echo boom >&2; exit 3"]).await.unwrap_err();
        match err {
            AppError::Tool(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_internal() {
        let tool = ToolCommand::new("/definitely/not/here/yt-dlp");
        assert!(matches!(
            tool.capture(["--version"]).await,
            Err(AppError::Internal(_))
        ));
    }
}
