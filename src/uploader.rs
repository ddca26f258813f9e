use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::logging::LogSink;
use crate::remote::{self, remote_spec, RemoteStore};

/// Extensions treated as finished media worth syncing.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "m4a", "mp3", "opus", "ogg", "wav", "flac",
];

/// Counters for the closing log line. Individual failures are only logged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
    pub delete_failed: usize,
}

/// Where and how to push the files.
#[derive(Debug, Clone)]
pub struct UploadTarget<'a> {
    pub remote: &'a str,
    pub path: &'a str,
    pub delete_after_upload: bool,
    pub batch_size: usize,
}

/// Media files directly inside `dir`, sorted by name.
pub fn media_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_media(p))
        .collect();
    files.sort();
    files
}

fn is_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Copies every media file in `dir` to the remote, batch by batch.
///
/// Files already present remotely are skipped. A failed copy or delete is
/// logged and the next file is processed; nothing is rolled back.
pub async fn upload_dir<S>(
    store: &S,
    dir: &Path,
    target: &UploadTarget<'_>,
    sink: &LogSink,
) -> UploadSummary
where
    S: RemoteStore + ?Sized,
{
    let mut summary = UploadSummary::default();
    let destination = remote_spec(target.remote, target.path);

    if !dir.is_dir() {
        sink.warn(format!("Output directory {} does not exist, nothing to upload", dir.display()));
        return summary;
    }

    let files = media_files(dir);
    if files.is_empty() {
        sink.line(format!("No media files to upload in {}", dir.display()));
        return summary;
    }

    let batch_size = target.batch_size.max(1);
    let batches = files.len().div_ceil(batch_size);
    sink.line(format!("☁ Uploading {} file(s) to {} in {} batch(es)", files.len(), destination, batches));

    for (index, batch) in files.chunks(batch_size).enumerate() {
        sink.line(format!("── Batch {}/{} ──", index + 1, batches));
        let mut uploaded_in_batch = Vec::new();

        for path in batch {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if remote::exists(store, target.remote, target.path, &name).await {
                sink.line(format!("⏭ {} already on {}, skipped", name, destination));
                summary.skipped += 1;
                continue;
            }

            let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            match store.copy(path, target.remote, target.path).await {
                Ok(()) => {
                    sink.line(format!("✅ Uploaded {} ({})", name, human_size(size)));
                    summary.uploaded += 1;
                    uploaded_in_batch.push(path);
                }
                Err(e) => {
                    sink.warn(format!("Upload of {} failed: {}", name, e));
                    summary.failed += 1;
                }
            }
        }

        if target.delete_after_upload {
            for path in uploaded_in_batch {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {
                        sink.line(format!("🗑 Deleted local {}", path.display()));
                        summary.deleted += 1;
                    }
                    Err(e) => {
                        sink.warn(format!("Could not delete {}: {}", path.display(), e));
                        summary.delete_failed += 1;
                    }
                }
            }
        }
    }

    sink.line(format!(
        "☁ Upload finished: {} uploaded, {} skipped, {} failed",
        summary.uploaded, summary.skipped, summary.failed
    ));
    if target.delete_after_upload {
        sink.line(format!(
            "🗑 {} local file(s) deleted, {} could not be deleted",
            summary.deleted, summary.delete_failed
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRemote;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn target(delete: bool, batch_size: usize) -> UploadTarget<'static> {
        UploadTarget {
            remote: "gdrive",
            path: "clips",
            delete_after_upload: delete,
            batch_size,
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    fn sink() -> (LogSink, mpsc::UnboundedReceiver<crate::orchestrator::Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink::new(tx), rx)
    }

    #[test]
    fn only_media_files_are_selected() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.mp4");
        touch(dir.path(), "a.MP3");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "clip.mp4.part");
        std::fs::create_dir(dir.path().join("sub.mkv")).unwrap();

        let names: Vec<_> = media_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.MP3", "b.mp4"]);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(500), "500 B");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(1_048_576), "1.00 MB");
    }

    #[tokio::test]
    async fn skips_present_files_and_uploads_the_rest() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "one.mp4");
        touch(dir.path(), "two.mp4");
        let remote = FakeRemote::with_files(["one.mp4"]);
        let (sink, _rx) = sink();

        let summary = upload_dir(&remote, dir.path(), &target(false, 10), &sink).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(remote.copied(), vec!["two.mp4"]);
        assert!(dir.path().join("two.mp4").exists());
    }

    #[tokio::test]
    async fn failed_copy_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.mp4");
        touch(dir.path(), "b.mp4");
        touch(dir.path(), "c.mp4");
        let remote = FakeRemote::new();
        remote.fail_copy_of("b.mp4");
        let (sink, _rx) = sink();

        let summary = upload_dir(&remote, dir.path(), &target(true, 10), &sink).await;
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deleted, 2);
        assert!(!dir.path().join("a.mp4").exists());
        assert!(dir.path().join("b.mp4").exists());
        assert!(!dir.path().join("c.mp4").exists());
    }

    #[tokio::test]
    async fn skipped_files_are_not_deleted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "kept.mp4");
        let remote = FakeRemote::with_files(["kept.mp4"]);
        let (sink, _rx) = sink();

        let summary = upload_dir(&remote, dir.path(), &target(true, 10), &sink).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.deleted, 0);
        assert!(dir.path().join("kept.mp4").exists());
    }

    #[tokio::test]
    async fn files_are_processed_in_batches() {
        let dir = TempDir::new().unwrap();
        for i in 0..25 {
            touch(dir.path(), &format!("{i:03}.mp4"));
        }
        let remote = FakeRemote::new();
        let (sink, mut rx) = sink();

        let summary = upload_dir(&remote, dir.path(), &target(false, 10), &sink).await;
        assert_eq!(summary.uploaded, 25);

        let mut batch_headers = 0;
        while let Ok(event) = rx.try_recv() {
            if let crate::orchestrator::Event::Log(line) = event {
                if line.contains("Batch ") {
                    batch_headers += 1;
                }
            }
        }
        assert_eq!(batch_headers, 3);
        assert_eq!(remote.copied().first().map(String::as_str), Some("000.mp4"));
    }

    #[tokio::test]
    async fn missing_directory_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let (sink, _rx) = sink();

        let summary =
            upload_dir(&remote, &dir.path().join("absent"), &target(false, 10), &sink).await;
        assert_eq!(summary, UploadSummary::default());
        assert!(remote.copied().is_empty());
    }
}
