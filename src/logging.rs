use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::orchestrator::Event;

/// Opens this launch's log file, writes the header block and installs the
/// global subscriber (stderr plus the file, without colours).
pub fn init(log_dir: &Path, rclone: Option<&Path>) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let started = Local::now();
    let log_path = log_dir.join(format!(
        "yt_clip_sync-{}.log",
        started.format("%Y%m%d-%H%M%S")
    ));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    file.write_all(header(&started.to_rfc3339(), &log_path, rclone).as_bytes())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(log_path)
}

fn header(started: &str, log_path: &Path, rclone: Option<&Path>) -> String {
    let sync = match rclone {
        Some(path) => format!("available ({})", path.display()),
        None => "not found".to_string(),
    };
    format!(
        "==================================================\n\
         yt_clip_sync started {started}\n\
         log file: {}\n\
         rclone: {sync}\n\
         ==================================================\n",
        log_path.display()
    )
}

/// Where a run writes what the user should see. Every line also goes to
/// `tracing`, and therefore into the log file.
#[derive(Clone, Debug)]
pub struct LogSink {
    events: UnboundedSender<Event>,
}

impl LogSink {
    pub fn new(events: UnboundedSender<Event>) -> Self {
        LogSink { events }
    }

    pub fn line(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!(target: "yt_clip_sync::run", "{}", msg);
        self.emit(Event::Log(msg));
    }

    pub fn warn(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!(target: "yt_clip_sync::run", "{}", msg);
        self.emit(Event::Log(format!("⚠ {msg}")));
    }

    /// Sends an event to the control surface. A closed receiver is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}
