use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;

use crate::error::AppError;
use crate::tool::ToolCommand;

/// The remote-sync side of a run.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether the sync tool could be located at all.
    fn is_available(&self) -> bool;

    /// Names of the configured remotes, without the trailing `:`.
    async fn list_remotes(&self) -> Result<Vec<String>, AppError>;

    /// File names directly under `remote:path`.
    async fn list_files(&self, remote: &str, path: &str) -> Result<Vec<String>, AppError>;

    /// Copies one local file into `remote:path`.
    async fn copy(&self, local: &Path, remote: &str, path: &str) -> Result<(), AppError>;
}

/// `gdrive:` + `videos/` → `gdrive:videos`.
pub fn remote_spec(remote: &str, path: &str) -> String {
    format!(
        "{}:{}",
        remote.trim().trim_end_matches(':'),
        path.trim().trim_matches('/')
    )
}

/// Lists `remote:path` and checks for an exact filename match.
///
/// The listing is fetched on every call. Any failure counts as "not there",
/// so the caller re-downloads rather than silently skipping.
pub async fn exists<S>(store: &S, remote: &str, path: &str, filename: &str) -> bool
where
    S: RemoteStore + ?Sized,
{
    match store.list_files(remote, path).await {
        Ok(names) => names.iter().any(|name| name == filename),
        Err(e) => {
            tracing::warn!(
                "Could not list {}, assuming '{}' is missing: {}",
                remote_spec(remote, path),
                filename,
                e
            );
            false
        }
    }
}

/// `RemoteStore` backed by the rclone command line.
#[derive(Debug, Clone)]
pub struct Rclone {
    tool: Option<ToolCommand>,
}

impl Rclone {
    /// `None` means rclone was not found; every call then fails.
    pub fn new(tool: Option<ToolCommand>) -> Self {
        Rclone { tool }
    }

    fn tool(&self) -> Result<&ToolCommand, AppError> {
        self.tool
            .as_ref()
            .ok_or_else(|| AppError::NotFound("rclone is not installed".to_string()))
    }
}

#[async_trait]
impl RemoteStore for Rclone {
    fn is_available(&self) -> bool {
        self.tool.is_some()
    }

    async fn list_remotes(&self) -> Result<Vec<String>, AppError> {
        let out = self.tool()?.capture(["listremotes"]).await?;
        Ok(out
            .lines()
            .map(|l| l.trim().trim_end_matches(':').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn list_files(&self, remote: &str, path: &str) -> Result<Vec<String>, AppError> {
        let target = remote_spec(remote, path);
        let out = self
            .tool()?
            .capture(["lsf", "--files-only", target.as_str()])
            .await?;
        Ok(out
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn copy(&self, local: &Path, remote: &str, path: &str) -> Result<(), AppError> {
        let target = remote_spec(remote, path);
        self.tool()?
            .capture([
                OsStr::new("copy"),
                local.as_os_str(),
                OsStr::new(&target),
                OsStr::new("-P"),
            ])
            .await
            .map(|_| ())
    }
}
