use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::models::{JobRequest, Mode};

/// Tool settings, stored in `config.toml` in the per-user config directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Explicit yt-dlp binary. Falls back to `<home>/bin`, then `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yt_dlp: Option<PathBuf>,
    /// Arguments placed before yt-dlp's own, e.g. `["-m", "yt_dlp"]` when
    /// `yt_dlp` points at a Python interpreter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub yt_dlp_args: Vec<String>,
    /// Explicit rclone binary. Falls back to `<home>/bin`, then `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rclone: Option<PathBuf>,
    pub probe_timeout_secs: u64,
    /// How long a cancelled yt-dlp gets to exit after SIGTERM.
    pub kill_grace_ms: u64,
    pub upload_batch_size: usize,
    pub probe: ProbePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            yt_dlp: None,
            yt_dlp_args: Vec::new(),
            rclone: None,
            probe_timeout_secs: 60,
            kill_grace_ms: 3000,
            upload_batch_size: 10,
            probe: ProbePolicy::default(),
        }
    }
}

/// When the filename probe before a synced run is considered too expensive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProbePolicy {
    /// Probe channels even when no item cap is set.
    pub probe_uncapped_channels: bool,
    /// Skip the probe when the item cap is above this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_probe_items: Option<u32>,
}

impl ProbePolicy {
    /// Returns the reason the probe should be skipped for this job, if any.
    pub fn should_skip(&self, job: &JobRequest) -> Option<&'static str> {
        if job.mode == Mode::Channel && job.max_items == 0 && !self.probe_uncapped_channels {
            return Some("channel without item cap");
        }
        match self.max_probe_items {
            Some(limit) if job.max_items > limit => Some("item cap above probe limit"),
            _ => None,
        }
    }
}

/// Filesystem locations used by the application.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// The installation directory: bundled `bin/`, `options.json` and `logs/` live here.
    pub home: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    /// Uses `home` when given (settings then live there too), otherwise the
    /// executable's directory plus the platform config directory.
    pub fn resolve(home: Option<PathBuf>) -> Result<Self> {
        if let Some(home) = home {
            let settings_file = home.join("config.toml");
            return Ok(AppPaths { home, settings_file });
        }

        let exe = env::current_exe().context("Could not locate the running executable")?;
        let home = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Executable {} has no parent directory", exe.display()))?;

        let project_dirs = ProjectDirs::from("com", "YtClipSync", "yt_clip_sync")
            .ok_or_else(|| anyhow!("Could not find a valid home directory to store config"))?;

        Ok(AppPaths {
            home,
            settings_file: project_dirs.config_dir().join("config.toml"),
        })
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    pub fn options_file(&self) -> PathBuf {
        self.home.join("options.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Picks the binary for `name`: the explicit setting, then the bundled copy, then `PATH`.
    pub fn resolve_tool(&self, explicit: Option<&Path>, name: &str) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let bundled = self.bin_dir().join(executable_name(name));
        if bundled.is_file() {
            return Some(bundled);
        }
        find_on_path(name)
    }

    /// `--ffmpeg-location` is only passed when ffmpeg is not installed system-wide.
    pub fn ffmpeg_location(&self) -> Option<PathBuf> {
        if find_on_path("ffmpeg").is_some() {
            return None;
        }
        let bin = self.bin_dir();
        bin.is_dir().then_some(bin)
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Looks `name` up in the directories of `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    let file = executable_name(name);
    env::split_paths(&path_var)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}

// ===================================================================
//                          SETTINGS (TOML)
// ===================================================================

/// Loads the settings, or writes the defaults if the file doesn't exist yet.
pub async fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::info!(
            "No settings file found. Creating a default one at: {}",
            path.display()
        );
        let defaults = Settings::default();
        save_settings(path, &defaults).await?;
        return Ok(defaults);
    }

    let content = fs::read_to_string(path).await?;
    let settings: Settings = toml::from_str(&content)
        .map_err(|e| anyhow!("Failed to parse settings file at {}: {}", path.display(), e))?;

    Ok(settings)
}

pub async fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let toml_string = toml::to_string_pretty(settings)?;
    fs::write(path, toml_string).await?;
    Ok(())
}

// ===================================================================
//                          LAST-RUN OPTIONS (JSON)
// ===================================================================

/// Reads the options saved by the last successful run.
/// A missing or unreadable file yields the defaults.
pub async fn load_options(path: &Path) -> JobRequest {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return JobRequest::default(),
        Err(e) => {
            tracing::warn!("Could not read saved options at {}: {}", path.display(), e);
            return JobRequest::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed options file {}: {}", path.display(), e);
        JobRequest::default()
    })
}

/// Overwrites the options file with the given job.
pub async fn save_options(path: &Path, job: &JobRequest) -> Result<()> {
    let json = serde_json::to_string_pretty(job)?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write options to {}", path.display()))?;
    Ok(())
}
