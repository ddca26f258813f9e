use anyhow::anyhow;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_stream::{wrappers::SplitStream, StreamExt};

use crate::error::AppError;
use crate::logging::LogSink;
use crate::models::{JobRequest, Mode};
use crate::orchestrator::Event;
use crate::progress::{parse_progress, RunState};
use crate::tool::ToolCommand;

/// How a fetch ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    /// The pause flag was seen and the child was terminated.
    Cancelled,
}

/// The media-fetching side of a run.
#[async_trait]
pub trait FetchTool: Send + Sync {
    /// Predicts output file names without downloading anything.
    async fn probe(&self, job: &JobRequest) -> Result<Vec<String>, AppError>;

    /// Downloads the job, streaming output into `sink` and progress into `state`.
    async fn fetch(
        &self,
        job: &JobRequest,
        state: &RunState,
        sink: &LogSink,
    ) -> Result<FetchOutcome, AppError>;
}

/// Arguments that limit which items of a playlist or channel are fetched.
fn mode_args(job: &JobRequest) -> Vec<String> {
    match (job.mode, job.item_cap()) {
        (Mode::Single, _) => vec!["--no-playlist".to_string()],
        (_, Some(cap)) => vec!["--playlist-end".to_string(), cap.to_string()],
        (_, None) => Vec::new(),
    }
}

/// Builds the full yt-dlp argument list for a download.
pub fn build_args(job: &JobRequest, ffmpeg_location: Option<&Path>) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(location) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(location.to_string_lossy().to_string());
    }
    if let Some(section) = job.section_spec() {
        args.push("--download-sections".to_string());
        args.push(section);
    }

    let output = Path::new(&job.output_directory).join(job.name_template());
    args.extend([
        "-f".to_string(),
        job.format_selector(),
        "--newline".to_string(),
        "-o".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args.extend(mode_args(job));
    args.push(job.normalized_url());

    if job.audio_only {
        args.extend(["-x", "--audio-format", "mp3"].map(String::from));
    }
    args
}

/// Arguments for a dry run that only prints the file names yt-dlp would write.
pub fn probe_args(job: &JobRequest) -> Vec<String> {
    let mut args = vec![
        "--get-filename".to_string(),
        "--skip-download".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        job.name_template().to_string(),
        "-f".to_string(),
        job.format_selector(),
    ];
    args.extend(mode_args(job));
    args.push(job.normalized_url());
    args
}

/// Turns raw `--get-filename` output into the names that will exist after the
/// download, including the mp3 rename done by audio extraction.
pub fn predicted_names(output: &str, audio_only: bool) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| Path::new(l).file_name())
        .map(|name| {
            let name = Path::new(name);
            let name = if audio_only {
                name.with_extension("mp3")
            } else {
                name.to_path_buf()
            };
            name.to_string_lossy().to_string()
        })
        .collect()
}

/// `FetchTool` backed by the yt-dlp command line.
#[derive(Debug, Clone)]
pub struct YtDlp {
    tool: ToolCommand,
    ffmpeg_location: Option<PathBuf>,
    probe_timeout: Duration,
    kill_grace: Duration,
}

impl YtDlp {
    pub fn new(tool: ToolCommand) -> Self {
        YtDlp {
            tool,
            ffmpeg_location: None,
            probe_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(3),
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

#[async_trait]
impl FetchTool for YtDlp {
    async fn probe(&self, job: &JobRequest) -> Result<Vec<String>, AppError> {
        let args = probe_args(job);
        let output = tokio::time::timeout(self.probe_timeout, self.tool.capture(&args))
            .await
            .map_err(|_| {
                AppError::Tool(format!(
                    "filename probe timed out after {}s",
                    self.probe_timeout.as_secs()
                ))
            })??;
        Ok(predicted_names(&output, job.audio_only))
    }

    async fn fetch(
        &self,
        job: &JobRequest,
        state: &RunState,
        sink: &LogSink,
    ) -> Result<FetchOutcome, AppError> {
        let args = build_args(job, self.ffmpeg_location.as_deref());
        tracing::debug!("Launching {} {:?}", self.tool.program.display(), args);

        let mut child = self
            .tool
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to start yt-dlp process: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stderr was not captured"))?;

        // Titles are not always UTF-8, so lines are split on raw bytes and decoded lossily.
        let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

        while let Some(chunk) = lines.next().await {
            if state.is_paused() {
                terminate(&mut child, self.kill_grace).await;
                sink.line("⏸ Download interrupted");
                return Ok(FetchOutcome::Cancelled);
            }

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    terminate(&mut child, self.kill_grace).await;
                    return Err(anyhow!("Failed to read yt-dlp output: {}", e).into());
                }
            };
            let text = String::from_utf8_lossy(&chunk);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(pct) = parse_progress(line) {
                state.set_progress(pct);
                sink.emit(Event::Progress(pct));
            }
            sink.line(line);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| anyhow!("yt-dlp process failed to execute: {}", e))?;
        if !status.success() {
            return Err(AppError::Tool(format!("yt-dlp exited with {}", status)));
        }

        state.set_progress(100.0);
        sink.emit(Event::Progress(100.0));
        Ok(FetchOutcome::Completed)
    }
}

/// The command that signals the child and everything it spawned (ffmpeg for
/// sections and post-processing).
#[cfg(unix)]
fn stop_command(pid: u32, force: bool) -> Option<tokio::process::Command> {
    // The child leads its own process group, so a negative pid reaches all of it.
    let mut cmd = tokio::process::Command::new("kill");
    cmd.args([if force { "-KILL" } else { "-TERM" }, "--", &format!("-{pid}")]);
    Some(cmd)
}

#[cfg(windows)]
fn stop_command(pid: u32, force: bool) -> Option<tokio::process::Command> {
    let mut cmd = tokio::process::Command::new("taskkill");
    if force {
        cmd.arg("/F");
    }
    cmd.args(["/T", "/PID", &pid.to_string()]);
    Some(cmd)
}

#[cfg(not(any(unix, windows)))]
fn stop_command(_pid: u32, _force: bool) -> Option<tokio::process::Command> {
    None
}

async fn signal_tree(pid: u32, force: bool) -> bool {
    let Some(mut cmd) = stop_command(pid, force) else {
        return false;
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Asks the child's process tree to stop, then force-kills whatever is still
/// alive after `grace`. The child is always reaped before returning.
async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return;
    };

    if signal_tree(pid, false).await {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("yt-dlp stopped ({})", status);
                // Helpers that ignored the polite request must not outlive the run.
                signal_tree(pid, true).await;
                return;
            }
            Ok(Err(e)) => tracing::warn!("Failed to wait for yt-dlp: {}", e),
            Err(_) => tracing::warn!("yt-dlp still running after {:?}; killing it", grace),
        }
    }

    signal_tree(pid, true).await;
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill yt-dlp: {}", e);
    }
}
