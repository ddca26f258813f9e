use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(?P<progress>\d+(?:\.\d+)?)%").unwrap()
});

/// Extracts the percentage from a yt-dlp `[download]` line.
/// Anything unrecognised yields `None`.
pub fn parse_progress(line: &str) -> Option<f64> {
    let caps = PROGRESS_REGEX.captures(line)?;
    let pct: f64 = caps.name("progress")?.as_str().parse().ok()?;
    pct.is_finite().then(|| pct.clamp(0.0, 100.0))
}

/// Where the orchestrator currently is in a run.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Checking,
    Fetching,
    Uploading,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Checking,
            2 => Phase::Fetching,
            3 => Phase::Uploading,
            _ => Phase::Idle,
        }
    }
}

/// Progress and control flags shared between the worker and the control surface.
///
/// Every field is a plain scalar; readers tolerate slightly stale values.
#[derive(Debug, Default)]
pub struct RunState {
    progress_bits: AtomicU64,
    paused: AtomicBool,
    running: AtomicBool,
    phase: AtomicU8,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    pub fn set_progress(&self, pct: f64) {
        self.progress_bits
            .store(pct.clamp(0.0, 100.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Flips the pause flag and returns the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks a run as started. Returns `false` if one was already active.
    pub fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish(&self) {
        self.set_phase(Phase::Idle);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }
}
