use crate::{
    config::{self, Settings},
    error::AppError,
    models::{CommandResponse, FormResponse, JobRequest, LogQuery, LogResponse, RunStatus},
    orchestrator::{Ack, Command, Event, RunOutcome},
    remote::RemoteStore,
    AppState,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::collections::VecDeque;
use std::sync::PoisonError;
use tokio::sync::mpsc::UnboundedReceiver;

// ===================================================================
//                          FORM HANDLERS
// ===================================================================

/// # GET /form - Returns the last saved options plus the choices for each field.
pub async fn get_form(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let options = config::load_options(&state.paths.options_file()).await;
    let remote = state.engine.remote();
    let remotes = if remote.is_available() {
        remote.list_remotes().await.unwrap_or_else(|e| {
            tracing::warn!("Could not list rclone remotes: {}", e);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    Ok(Json(FormResponse {
        options,
        resolutions: crate::models::Resolution::ALL.iter().map(|r| r.height()).collect(),
        remotes,
        sync_available: remote.is_available(),
    }))
}

/// # GET /remotes - Lists the remotes configured in rclone.
pub async fn list_remotes(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let remotes = state.engine.remote().list_remotes().await?;
    Ok(Json(remotes))
}

// ===================================================================
//                          RUN HANDLERS
// ===================================================================

/// # POST /start - Starts a run in the background.
pub async fn start_run(
    State(state): State<AppState>,
    Json(payload): Json<JobRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("Start requested for URL: {}", payload.url);
    match state.engine.dispatch(Command::Start(payload)) {
        Ack::Started => Ok((
            StatusCode::ACCEPTED,
            Json(CommandResponse {
                message: "Run started".to_string(),
            }),
        )),
        Ack::Busy => Err(AppError::Conflict("A run is already in progress.".to_string())),
        Ack::Rejected(reason) => Err(AppError::BadRequest(reason)),
        other => Err(AppError::Internal(anyhow::anyhow!("Unexpected answer to start: {:?}", other))),
    }
}

/// # POST /pause - Toggles the pause flag of the active run.
pub async fn toggle_pause(State(state): State<AppState>) -> impl IntoResponse {
    let message = match state.engine.dispatch(Command::TogglePause) {
        Ack::Paused => "Pause requested; the download stops at the next output line".to_string(),
        Ack::Resumed => "Pause cleared".to_string(),
        Ack::Ignored(reason) => reason,
        other => format!("{:?}", other),
    };
    (StatusCode::OK, Json(CommandResponse { message }))
}

/// # GET /status - Returns the progress and phase of the current run.
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let run = state.engine.state();
    let notice = state
        .notice
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(RunStatus {
        phase: run.phase(),
        progress: run.progress(),
        paused: run.is_paused(),
        running: run.is_running(),
        notice,
    })
}

/// # GET /log - Returns log lines starting at `since`.
pub async fn get_log(State(state): State<AppState>, Query(query): Query<LogQuery>) -> impl IntoResponse {
    let log = state.log.read().unwrap_or_else(PoisonError::into_inner);
    Json(LogResponse {
        next: log.next_index(),
        lines: log.since(query.since.unwrap_or(0)),
    })
}

// ===================================================================
//                          SETTINGS HANDLERS
// ===================================================================

/// # GET /config - Returns the current tool settings.
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state
        .settings
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    (StatusCode::OK, Json(settings))
}

/// # POST /config - Saves new tool settings. They apply on the next launch.
pub async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<Settings>,
) -> Result<impl IntoResponse, AppError> {
    config::save_settings(&state.paths.settings_file, &payload).await?;
    *state.settings.write().unwrap_or_else(PoisonError::into_inner) = payload.clone();
    tracing::info!("Settings updated and saved; restart to apply.");
    Ok((StatusCode::OK, Json(payload)))
}

// ===================================================================
//                          EVENT COLLECTOR
// ===================================================================

/// Drains run events into the shared log view and the notice slot.
pub async fn collect_events(state: AppState, mut events: UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Log(line) => push_log(&state, line),
            Event::Warning(msg) | Event::Error(msg) => {
                push_log(&state, format!("⚠ {}", msg));
                *state.notice.write().unwrap_or_else(PoisonError::into_inner) = Some(msg);
            }
            Event::Finished(outcome) => {
                if outcome != RunOutcome::Failed {
                    *state.notice.write().unwrap_or_else(PoisonError::into_inner) = None;
                }
                push_log(&state, format!("■ Run finished: {:?}", outcome));
            }
            Event::Progress(_) | Event::Phase(_) => {}
        }
    }
}

fn push_log(state: &AppState, line: String) {
    state.log.write().unwrap_or_else(PoisonError::into_inner).push(line);
}

/// The most recent log lines. Indices count every line ever pushed, so a
/// client polling with `since` keeps its place after old lines are dropped.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    first: usize,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            lines: VecDeque::new(),
            first: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.first += 1;
        }
        self.lines.push_back(line);
    }

    /// Index the next pushed line will get.
    pub fn next_index(&self) -> usize {
        self.first + self.lines.len()
    }

    /// Lines from `index` on; dropped lines are skipped.
    pub fn since(&self, index: usize) -> Vec<String> {
        self.lines
            .iter()
            .skip(index.saturating_sub(self.first))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> LogBuffer {
        let mut log = LogBuffer::new(capacity);
        for i in 0..count {
            log.push(format!("line {i}"));
        }
        log
    }

    #[test]
    fn log_within_capacity_keeps_everything() {
        let log = filled(10, 3);
        assert_eq!(log.next_index(), 3);
        assert_eq!(log.since(0), vec!["line 0", "line 1", "line 2"]);
        assert_eq!(log.since(2), vec!["line 2"]);
        assert!(log.since(7).is_empty());
    }

    #[test]
    fn log_drops_oldest_lines_but_keeps_indices() {
        let log = filled(3, 10);
        assert_eq!(log.next_index(), 10);
        assert_eq!(log.since(0), vec!["line 7", "line 8", "line 9"]);
        assert_eq!(log.since(8), vec!["line 8", "line 9"]);
        assert!(log.since(10).is_empty());
    }
}
