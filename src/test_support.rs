//! In-memory stand-ins for yt-dlp and rclone.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AppError;
use crate::fetch::{FetchOutcome, FetchTool};
use crate::logging::LogSink;
use crate::models::JobRequest;
use crate::progress::RunState;
use crate::remote::RemoteStore;

#[derive(Debug, Default)]
pub struct FakeRemote {
    files: Mutex<Vec<String>>,
    copied: Mutex<Vec<String>>,
    failing_copies: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let remote = Self::default();
        *remote.files.lock().unwrap() = files.into_iter().map(Into::into).collect();
        remote
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_copy_of(&self, name: &str) {
        self.failing_copies.lock().unwrap().insert(name.to_string());
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn list_remotes(&self) -> Result<Vec<String>, AppError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Tool("listremotes failed".to_string()));
        }
        Ok(vec!["fake".to_string()])
    }

    async fn list_files(&self, _remote: &str, _path: &str) -> Result<Vec<String>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Tool("listing failed".to_string()));
        }
        Ok(self.files.lock().unwrap().clone())
    }

    async fn copy(&self, local: &Path, _remote: &str, _path: &str) -> Result<(), AppError> {
        let name = local.file_name().unwrap().to_string_lossy().to_string();
        if self.failing_copies.lock().unwrap().contains(&name) {
            return Err(AppError::Tool(format!("copy of {name} failed")));
        }
        self.copied.lock().unwrap().push(name.clone());
        self.files.lock().unwrap().push(name);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum FetchBehaviour {
    Complete,
    UntilPaused,
    Fail(String),
}

#[derive(Debug)]
pub struct FakeFetch {
    behaviour: FetchBehaviour,
    probe_result: Result<Vec<String>, String>,
    produces: Vec<String>,
    probe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeFetch {
    fn with(behaviour: FetchBehaviour) -> Self {
        FakeFetch {
            behaviour,
            probe_result: Ok(Vec::new()),
            produces: Vec::new(),
            probe_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn completing() -> Self {
        Self::with(FetchBehaviour::Complete)
    }

    /// Keeps "downloading" until the pause flag is raised.
    pub fn until_paused() -> Self {
        Self::with(FetchBehaviour::UntilPaused)
    }

    pub fn failing(msg: &str) -> Self {
        Self::with(FetchBehaviour::Fail(msg.to_string()))
    }

    pub fn probing(mut self, result: Result<Vec<String>, String>) -> Self {
        self.probe_result = result;
        self
    }

    /// Files written into the output directory by a completed fetch.
    pub fn producing<I: IntoIterator<Item = &'static str>>(mut self, names: I) -> Self {
        self.produces = names.into_iter().map(String::from).collect();
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchTool for FakeFetch {
    async fn probe(&self, _job: &JobRequest) -> Result<Vec<String>, AppError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probe_result.clone().map_err(AppError::Tool)
    }

    async fn fetch(
        &self,
        job: &JobRequest,
        state: &RunState,
        sink: &LogSink,
    ) -> Result<FetchOutcome, AppError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            FetchBehaviour::Complete => {
                for name in &self.produces {
                    tokio::fs::write(Path::new(&job.output_directory).join(name), b"media").await?;
                }
                sink.line("[download] 100% of 5B");
                state.set_progress(100.0);
                Ok(FetchOutcome::Completed)
            }
            FetchBehaviour::UntilPaused => loop {
                if state.is_paused() {
                    return Ok(FetchOutcome::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            },
            FetchBehaviour::Fail(msg) => Err(AppError::Tool(msg.clone())),
        }
    }
}
