use anyhow::{anyhow, bail};
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tower_http::cors::{Any, CorsLayer};

use crate::config::{AppPaths, Settings};
use crate::fetch::YtDlp;
use crate::handlers::LogBuffer;
use crate::models::{JobRequest, Mode, Resolution};
use crate::orchestrator::{Ack, Command, Event, Orchestrator, OrchestratorOptions, RunOutcome};
use crate::remote::{Rclone, RemoteStore};
use crate::tool::ToolCommand;

// --- Modules ---
pub mod config;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod remote;
pub mod tool;
pub mod uploader;

#[cfg(test)]
mod test_support;

// --- State Type Aliases ---
pub type Engine = Orchestrator<YtDlp, Rclone>;
pub type LogView = Arc<RwLock<LogBuffer>>;

/// Lines kept in memory for `GET /log`; older ones are still in the log file.
const LOG_CAPACITY: usize = 5_000;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub log: LogView,
    pub notice: Arc<RwLock<Option<String>>>,
    pub settings: Arc<RwLock<Settings>>,
    pub paths: Arc<AppPaths>,
}

// --- Command-Line Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Clip videos with yt-dlp and sync them with rclone.", long_about = None)]
struct Cli {
    /// Installation directory holding bin/, options.json and logs/.
    /// Defaults to the directory of this executable.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP control surface in the foreground.
    Serve,
    /// Run one job in the terminal. Type `p` + Enter or press Ctrl-C to cancel.
    Run(RunArgs),
    /// List the remotes configured in rclone.
    Remotes,
}

/// Every flag overrides the value saved by the last successful run.
#[derive(Args, Debug)]
struct RunArgs {
    /// Video, playlist or channel URL.
    url: Option<String>,
    /// Clip start in seconds.
    #[arg(long)]
    start: Option<u32>,
    /// Clip end in seconds (0 with start 0 downloads the full item).
    #[arg(long)]
    end: Option<u32>,
    /// Maximum height: 360, 480, 720 or 1080.
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<Resolution>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    audio_only: Option<bool>,
    #[arg(long, short)]
    output: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Maximum number of playlist/channel items (0 = no cap).
    #[arg(long)]
    max_items: Option<u32>,
    /// Upload results with rclone.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    sync: Option<bool>,
    #[arg(long)]
    remote: Option<String>,
    #[arg(long)]
    remote_path: Option<String>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    delete_after_upload: Option<bool>,
    /// Skip the "already on remote" pre-check.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    skip_check: Option<bool>,
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let height: u32 = s
        .trim()
        .trim_end_matches('p')
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    Resolution::try_from(height)
}

impl RunArgs {
    fn apply(self, base: JobRequest) -> JobRequest {
        JobRequest {
            url: self.url.unwrap_or(base.url),
            start_offset: self.start.unwrap_or(base.start_offset),
            end_offset: self.end.unwrap_or(base.end_offset),
            resolution: self.resolution.unwrap_or(base.resolution),
            audio_only: self.audio_only.unwrap_or(base.audio_only),
            output_directory: self.output.unwrap_or(base.output_directory),
            mode: self.mode.unwrap_or(base.mode),
            max_items: self.max_items.unwrap_or(base.max_items),
            remote_sync: self.sync.unwrap_or(base.remote_sync),
            remote_name: self.remote.unwrap_or(base.remote_name),
            remote_path: self.remote_path.unwrap_or(base.remote_path),
            delete_after_upload: self.delete_after_upload.unwrap_or(base.delete_after_upload),
            skip_check: self.skip_check.unwrap_or(base.skip_check),
        }
    }
}

// --- Main Application Logic ---
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::resolve(cli.home)?;

    let settings_result = config::load_settings(&paths.settings_file).await;
    let settings = settings_result.as_ref().cloned().unwrap_or_default();
    let rclone_path = paths.resolve_tool(settings.rclone.as_deref(), "rclone");

    let log_path = logging::init(&paths.log_dir(), rclone_path.as_deref())?;
    tracing::info!("Logging to {}", log_path.display());
    if let Err(e) = settings_result {
        tracing::warn!("Using default settings: {:#}", e);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = build_engine(&paths, &settings, rclone_path, tx);

    match cli.command {
        Commands::Serve => run_server(engine, rx, settings, paths).await,
        Commands::Run(args) => run_once(engine, rx, args, &paths).await,
        Commands::Remotes => {
            for remote in remote_names(engine.remote()).await? {
                println!("{remote}");
            }
            Ok(())
        }
    }
}

async fn remote_names<R: RemoteStore>(remote: &R) -> anyhow::Result<Vec<String>> {
    remote
        .list_remotes()
        .await
        .map_err(|e| anyhow!("Could not list rclone remotes: {e}"))
}

fn build_engine(
    paths: &AppPaths,
    settings: &Settings,
    rclone: Option<PathBuf>,
    events: UnboundedSender<Event>,
) -> Arc<Engine> {
    let yt_dlp = paths
        .resolve_tool(settings.yt_dlp.as_deref(), "yt-dlp")
        .unwrap_or_else(|| PathBuf::from("yt-dlp"));
    let fetcher = YtDlp::new(ToolCommand::new(yt_dlp).with_args(&settings.yt_dlp_args))
        .with_ffmpeg_location(paths.ffmpeg_location())
        .with_probe_timeout(Duration::from_secs(settings.probe_timeout_secs))
        .with_kill_grace(Duration::from_millis(settings.kill_grace_ms));
    let remote = Rclone::new(rclone.map(ToolCommand::new));

    Orchestrator::new(
        fetcher,
        remote,
        OrchestratorOptions {
            options_file: paths.options_file(),
            probe_policy: settings.probe,
            upload_batch_size: settings.upload_batch_size,
        },
        events,
    )
}

/// Runs the Axum control surface.
async fn run_server(
    engine: Arc<Engine>,
    events: mpsc::UnboundedReceiver<Event>,
    settings: Settings,
    paths: AppPaths,
) -> anyhow::Result<()> {
    let state = AppState {
        engine,
        log: Arc::new(RwLock::new(LogBuffer::new(LOG_CAPACITY))),
        notice: Arc::new(RwLock::new(None)),
        settings: Arc::new(RwLock::new(settings)),
        paths: Arc::new(paths),
    };
    tokio::spawn(handlers::collect_events(state.clone(), events));

    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port_str = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{}:{}", host, port_str);
    let app = Router::new()
        .route("/form", get(handlers::get_form))
        .route("/remotes", get(handlers::list_remotes))
        .route("/start", post(handlers::start_run))
        .route("/pause", post(handlers::toggle_pause))
        .route("/status", get(handlers::get_status))
        .route("/log", get(handlers::get_log))
        .route("/config", get(handlers::get_config).post(handlers::update_config))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state);
    tracing::info!("Control surface listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs a single job in the terminal and waits for it to finish.
async fn run_once(
    engine: Arc<Engine>,
    mut events: mpsc::UnboundedReceiver<Event>,
    args: RunArgs,
    paths: &AppPaths,
) -> anyhow::Result<()> {
    let job = args.apply(config::load_options(&paths.options_file()).await);

    match engine.dispatch(Command::Start(job)) {
        Ack::Started => {}
        Ack::Rejected(reason) => bail!("{}", reason),
        other => bail!("Could not start: {:?}", other),
    }

    let stdin_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().eq_ignore_ascii_case("p") {
                report_ack(stdin_engine.dispatch(Command::TogglePause));
            }
        }
    });

    let signal_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            report_ack(signal_engine.dispatch(Command::TogglePause));
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            Event::Log(line) => println!("{line}"),
            Event::Phase(phase) => println!("── {:?} ──", phase),
            Event::Warning(msg) => eprintln!("⚠ {msg}"),
            Event::Error(msg) => eprintln!("✖ {msg}"),
            Event::Progress(_) => {}
            Event::Finished(RunOutcome::Failed) => return Err(anyhow!("Run failed")),
            Event::Finished(outcome) => {
                println!("Run finished: {:?}", outcome);
                return Ok(());
            }
        }
    }
    Ok(())
}

fn report_ack(ack: Ack) {
    match ack {
        Ack::Paused => eprintln!("⏸ Pausing at the next output line..."),
        Ack::Resumed => eprintln!("▶ Pause cleared"),
        Ack::Ignored(reason) => eprintln!("{reason}"),
        other => eprintln!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRemote;

    #[test]
    fn cli_flags_override_saved_options() {
        let cli = Cli::try_parse_from([
            "yt_clip_sync",
            "run",
            "https://example.com/watch?v=abc",
            "--start",
            "10",
            "--end",
            "40",
            "--resolution",
            "1080p",
            "--audio-only",
            "--mode",
            "playlist",
            "--sync",
            "false",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let saved = JobRequest {
            remote_sync: true,
            remote_name: "gdrive".into(),
            max_items: 3,
            ..Default::default()
        };
        let job = args.apply(saved);

        assert_eq!(job.url, "https://example.com/watch?v=abc");
        assert_eq!(job.start_offset, 10);
        assert_eq!(job.end_offset, 40);
        assert_eq!(job.resolution, Resolution::P1080);
        assert!(job.audio_only);
        assert_eq!(job.mode, Mode::Playlist);
        assert!(!job.remote_sync);
        assert_eq!(job.remote_name, "gdrive");
        assert_eq!(job.max_items, 3);
    }

    #[test]
    fn bad_resolution_is_rejected() {
        assert!(parse_resolution("720").is_ok());
        assert!(parse_resolution("1440").is_err());
        assert!(parse_resolution("hd").is_err());
    }

    #[tokio::test]
    async fn remotes_listing_surfaces_rclone_errors() {
        let remote = FakeRemote::new();
        assert_eq!(remote_names(&remote).await.unwrap(), vec!["fake"]);

        remote.fail_listing(true);
        let err = remote_names(&remote).await.unwrap_err();
        assert!(err.to_string().contains("Could not list rclone remotes"));
    }

    #[test]
    fn home_is_a_global_flag() {
        let cli = Cli::try_parse_from(["yt_clip_sync", "remotes", "--home", "/opt/app"]).unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/opt/app")));
    }
}
