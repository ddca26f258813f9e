use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{self, ProbePolicy};
use crate::fetch::{FetchOutcome, FetchTool};
use crate::logging::LogSink;
use crate::models::JobRequest;
use crate::progress::{Phase, RunState};
use crate::remote::{self, RemoteStore};
use crate::uploader::{self, UploadTarget};

/// What the control surface can ask for.
#[derive(Debug, Clone)]
pub enum Command {
    Start(JobRequest),
    TogglePause,
}

/// The immediate answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Started,
    /// The request itself was unusable; nothing changed.
    Rejected(String),
    /// Another run is still active; a `Warning` event was emitted.
    Busy,
    Paused,
    Resumed,
    Ignored(String),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Every probed item was already on the remote; nothing was fetched.
    AlreadySynced,
    Cancelled,
    Failed,
}

/// Notifications emitted while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Log(String),
    Progress(f64),
    Phase(Phase),
    /// Shown to the user as a blocking notice.
    Warning(String),
    /// Shown to the user as a blocking error dialog.
    Error(String),
    Finished(RunOutcome),
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Where the last successful job is saved.
    pub options_file: PathBuf,
    pub probe_policy: ProbePolicy,
    pub upload_batch_size: usize,
}

/// Runs jobs one at a time: probe, fetch, upload, save options.
pub struct Orchestrator<F, R> {
    fetcher: F,
    remote: R,
    state: Arc<RunState>,
    options: OrchestratorOptions,
    events: UnboundedSender<Event>,
}

impl<F, R> Orchestrator<F, R>
where
    F: FetchTool + 'static,
    R: RemoteStore + 'static,
{
    pub fn new(
        fetcher: F,
        remote: R,
        options: OrchestratorOptions,
        events: UnboundedSender<Event>,
    ) -> Arc<Self> {
        Arc::new(Orchestrator {
            fetcher,
            remote,
            state: Arc::new(RunState::new()),
            options,
            events,
        })
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Handles one command. `Start` spawns the worker and returns immediately;
    /// must be called from within a tokio runtime.
    pub fn dispatch(self: &Arc<Self>, command: Command) -> Ack {
        match command {
            Command::Start(job) => self.start(job),
            Command::TogglePause => self.toggle_pause(),
        }
    }

    fn start(self: &Arc<Self>, job: JobRequest) -> Ack {
        if let Err(reason) = job.validate() {
            tracing::warn!("Start rejected: {}", reason);
            self.emit(Event::Warning(reason.clone()));
            return Ack::Rejected(reason);
        }
        if !self.state.try_begin() {
            tracing::warn!("Start rejected: a run is already in progress");
            self.emit(Event::Warning("A run is already in progress".to_string()));
            return Ack::Busy;
        }

        self.state.set_paused(false);
        self.state.set_progress(0.0);
        self.emit(Event::Progress(0.0));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.run(&job).await;
            this.state.finish();
            this.emit(Event::Phase(Phase::Idle));
            this.emit(Event::Finished(outcome));
        });
        Ack::Started
    }

    fn toggle_pause(&self) -> Ack {
        if !self.state.is_running() {
            return Ack::Ignored("No run in progress".to_string());
        }
        if self.state.toggle_pause() {
            tracing::info!("Pause requested");
            Ack::Paused
        } else {
            tracing::info!("Pause cleared");
            Ack::Resumed
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn enter(&self, phase: Phase) {
        self.state.set_phase(phase);
        self.emit(Event::Phase(phase));
    }

    /// Why the pre-flight existence check does not apply to this job, if it doesn't.
    fn probe_skip_reason(&self, job: &JobRequest) -> Option<&'static str> {
        if !job.remote_sync {
            Some("remote sync disabled")
        } else if !self.remote.is_available() {
            Some("rclone not available")
        } else if job.skip_check {
            Some("check disabled by user")
        } else {
            self.options.probe_policy.should_skip(job)
        }
    }

    /// Returns `true` when every item the job would produce is already remote.
    async fn everything_already_remote(&self, job: &JobRequest, sink: &LogSink) -> bool {
        let names = match self.fetcher.probe(job).await {
            Ok(names) => names,
            Err(e) => {
                sink.warn(format!("Pre-check failed, downloading anyway: {e}"));
                return false;
            }
        };
        if names.is_empty() {
            sink.line("Pre-check found no file names, downloading anyway");
            return false;
        }

        let mut missing = 0;
        for name in &names {
            if remote::exists(&self.remote, &job.remote_name, &job.remote_path, name).await {
                sink.line(format!("✔ {name} already on remote"));
            } else {
                missing += 1;
            }
        }
        if missing > 0 {
            sink.line(format!("{} of {} item(s) missing on remote", missing, names.len()));
        }
        missing == 0
    }

    async fn save_options(&self, job: &JobRequest, sink: &LogSink) {
        if let Err(e) = config::save_options(&self.options.options_file, job).await {
            sink.warn(format!("Could not save options: {e:#}"));
        }
    }

    async fn run(&self, job: &JobRequest) -> RunOutcome {
        let sink = LogSink::new(self.events.clone());
        sink.line(format!("▶ Starting {}", job.normalized_url()));

        match self.probe_skip_reason(job) {
            Some(reason) => tracing::debug!("Pre-check skipped: {}", reason),
            None => {
                self.enter(Phase::Checking);
                if self.everything_already_remote(job, &sink).await {
                    sink.line("All items already on remote, nothing to download");
                    self.state.set_progress(100.0);
                    self.emit(Event::Progress(100.0));
                    self.save_options(job, &sink).await;
                    return RunOutcome::AlreadySynced;
                }
            }
        }

        self.enter(Phase::Fetching);
        let out_dir = Path::new(&job.output_directory);
        if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
            let msg = format!("Could not create {}: {}", out_dir.display(), e);
            tracing::error!("{}", msg);
            self.emit(Event::Error(msg));
            return RunOutcome::Failed;
        }

        match self.fetcher.fetch(job, &self.state, &sink).await {
            Ok(FetchOutcome::Completed) => {}
            Ok(FetchOutcome::Cancelled) => {
                sink.line("⏸ Run cancelled, nothing uploaded");
                return RunOutcome::Cancelled;
            }
            Err(e) => {
                tracing::error!("Download failed: {}", e);
                self.emit(Event::Error(e.to_string()));
                return RunOutcome::Failed;
            }
        }

        if job.remote_sync {
            if self.remote.is_available() {
                self.enter(Phase::Uploading);
                let target = UploadTarget {
                    remote: &job.remote_name,
                    path: &job.remote_path,
                    delete_after_upload: job.delete_after_upload,
                    batch_size: self.options.upload_batch_size,
                };
                let summary = uploader::upload_dir(&self.remote, out_dir, &target, &sink).await;
                if summary.failed > 0 {
                    tracing::warn!("{} upload(s) failed", summary.failed);
                }
            } else {
                sink.warn("rclone not available, skipping upload");
            }
        }

        self.save_options(job, &sink).await;
        sink.line("✅ Done");
        RunOutcome::Completed
    }
}
