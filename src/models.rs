use clap::ValueEnum;
use directories::UserDirs;
use serde::{Deserialize, Serialize};

use crate::progress::Phase;

// === Job Models ===

/// How the URL should be interpreted by yt-dlp.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Single,
    Playlist,
    Channel,
}

/// Maximum video height offered by the form.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    P360,
    P480,
    #[default]
    P720,
    P1080,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
    ];

    pub fn height(self) -> u32 {
        match self {
            Resolution::P360 => 360,
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
        }
    }
}

impl TryFrom<u32> for Resolution {
    type Error = String;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.height() == height)
            .ok_or_else(|| format!("unsupported resolution {height}, expected one of 360/480/720/1080"))
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> Self {
        r.height()
    }
}

/// Everything needed for one run. Also the shape of the persisted options file,
/// so every field falls back to its default when missing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct JobRequest {
    pub url: String,
    /// Clip start in seconds.
    pub start_offset: u32,
    /// Clip end in seconds. `0` together with a `0` start means the full item.
    pub end_offset: u32,
    pub resolution: Resolution,
    pub audio_only: bool,
    pub output_directory: String,
    pub mode: Mode,
    /// `0` means no cap.
    pub max_items: u32,
    pub remote_sync: bool,
    pub remote_name: String,
    pub remote_path: String,
    pub delete_after_upload: bool,
    pub skip_check: bool,
}

impl Default for JobRequest {
    fn default() -> Self {
        let output_directory = UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|p| p.to_string_lossy().to_string()))
            .unwrap_or_else(|| "downloads".to_string());

        JobRequest {
            url: String::new(),
            start_offset: 0,
            end_offset: 30,
            resolution: Resolution::default(),
            audio_only: false,
            output_directory,
            mode: Mode::default(),
            max_items: 0,
            remote_sync: false,
            remote_name: String::new(),
            remote_path: String::new(),
            delete_after_upload: false,
            skip_check: false,
        }
    }
}

const CHANNEL_SUFFIX: &str = "/videos";

impl JobRequest {
    /// Checks the user-supplied fields before anything is launched.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("URL is missing".to_string());
        }
        if self.remote_sync && self.remote_name.trim().is_empty() {
            return Err("Remote sync is enabled but no remote is selected".to_string());
        }
        if !self.is_full_item() && self.end_offset <= self.start_offset {
            return Err(format!(
                "End ({}s) must be after start ({}s)",
                self.end_offset, self.start_offset
            ));
        }
        Ok(())
    }

    pub fn is_full_item(&self) -> bool {
        self.start_offset == 0 && self.end_offset == 0
    }

    /// The `--download-sections` value, e.g. `*10-40`.
    pub fn section_spec(&self) -> Option<String> {
        (!self.is_full_item()).then(|| format!("*{}-{}", self.start_offset, self.end_offset))
    }

    pub fn format_selector(&self) -> String {
        if self.audio_only {
            "bestaudio/best".to_string()
        } else {
            format!(
                "bestvideo[height<={}][ext=mp4]+bestaudio[ext=m4a]/best",
                self.resolution.height()
            )
        }
    }

    /// Output file name template, relative to the output directory.
    pub fn name_template(&self) -> &'static str {
        match self.mode {
            Mode::Single => "%(title)s.%(ext)s",
            Mode::Playlist | Mode::Channel => "%(playlist_index)03d - %(title)s.%(ext)s",
        }
    }

    /// Trims the URL and, for channels, appends the uploads tab when missing.
    pub fn normalized_url(&self) -> String {
        let url = self.url.trim();
        match self.mode {
            Mode::Channel if !url.trim_end_matches('/').ends_with(CHANNEL_SUFFIX) => {
                format!("{}{}", url.trim_end_matches('/'), CHANNEL_SUFFIX)
            }
            _ => url.to_string(),
        }
    }

    pub fn item_cap(&self) -> Option<u32> {
        (self.max_items > 0).then_some(self.max_items)
    }
}

// === API Request/Response Models ===

/// The response for `GET /form`: what the control surface needs to draw itself.
#[derive(Serialize, Debug)]
pub struct FormResponse {
    pub options: JobRequest,
    pub resolutions: Vec<u32>,
    pub remotes: Vec<String>,
    pub sync_available: bool,
}

/// The response sent after a command is accepted.
#[derive(Serialize, Debug)]
pub struct CommandResponse {
    pub message: String,
}

/// A snapshot of the current run for `GET /status`.
#[derive(Clone, Serialize, Debug)]
pub struct RunStatus {
    pub phase: Phase,
    pub progress: f64,
    pub paused: bool,
    pub running: bool,
    /// The last warning or error that would be shown as a blocking dialog.
    pub notice: Option<String>,
}

/// The query parameters for `GET /log`.
#[derive(Deserialize, Debug)]
pub struct LogQuery {
    pub since: Option<usize>,
}

#[derive(Serialize, Debug)]
pub struct LogResponse {
    /// Index to pass as `since` on the next poll.
    pub next: usize,
    pub lines: Vec<String>,
}
