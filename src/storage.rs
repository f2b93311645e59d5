use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// File handling for receipt attachments. The store never touches the
/// filesystem layout directly; the embedding app decides where trip
/// directories live.
pub trait AttachmentStore: Send + Sync {
    /// Absolute location of `relative` inside the trip's directory.
    fn resolve(&self, trip_name: &str, relative: &str) -> PathBuf;

    /// Copies `src` to `dst`. Returns `Ok(false)` when `dst` exists and
    /// `overwrite` is off.
    fn copy(&self, src: &Path, dst: &Path, overwrite: bool) -> AppResult<bool>;

    /// Best-effort delete; returns whether the file is gone afterwards.
    fn delete(&self, path: &Path) -> bool;

    /// Lowercased file extension, when the path has one.
    fn extension(&self, path: &Path) -> Option<String> {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

/// Attachment store rooted at a base directory; trip directories are its
/// direct children, named after the trip.
pub struct FsAttachmentStore {
    base: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FsAttachmentStore { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl AttachmentStore for FsAttachmentStore {
    fn resolve(&self, trip_name: &str, relative: &str) -> PathBuf {
        self.base.join(trip_name).join(relative)
    }

    fn copy(&self, src: &Path, dst: &Path, overwrite: bool) -> AppResult<bool> {
        if dst.exists() && !overwrite {
            return Ok(false);
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::from(e).with_context("path", parent.display().to_string()))?;
        }
        fs::copy(src, dst).map_err(|e| {
            AppError::from(e)
                .with_context("src", src.display().to_string())
                .with_context("dst", dst.display().to_string())
        })?;
        Ok(true)
    }

    fn delete(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(
                    target = "tripledger",
                    event = "attachment_delete_failed",
                    path = %path.display(),
                    error = %e
                );
                false
            }
        }
    }
}

/// User settings the store consults but does not own.
pub trait Preferences: Send + Sync {
    /// ISO-4217 code used when a trip has no explicit default.
    fn default_currency_code(&self) -> String;

    /// When on, trip totals only count receipts marked expensable.
    fn only_include_expensable(&self) -> bool;

    /// Gates the receipt-hint lookups.
    fn predict_categories(&self) -> bool;
}

/// Fixed preference values, handy for tests and simple embeddings.
#[derive(Debug, Clone)]
pub struct StaticPreferences {
    pub default_currency: String,
    pub only_include_expensable: bool,
    pub predict_categories: bool,
}

impl Default for StaticPreferences {
    fn default() -> Self {
        StaticPreferences {
            default_currency: "USD".to_string(),
            only_include_expensable: false,
            predict_categories: true,
        }
    }
}

impl Preferences for StaticPreferences {
    fn default_currency_code(&self) -> String {
        self.default_currency.clone()
    }

    fn only_include_expensable(&self) -> bool {
        self.only_include_expensable
    }

    fn predict_categories(&self) -> bool {
        self.predict_categories
    }
}

/// Destination for user-visible progress lines (merge reports and the like).
pub trait LogSink: Send + Sync {
    fn append(&self, logical_file: &str, line: &str);
}

/// Appends lines to `<dir>/<logical_file>`, one log per logical id.
pub struct FileLogSink {
    dir: PathBuf,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileLogSink { dir: dir.into() }
    }
}

impl LogSink for FileLogSink {
    fn append(&self, logical_file: &str, line: &str) {
        let path = self.dir.join(logical_file);
        let result = fs::create_dir_all(&self.dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")
        });
        if let Err(e) = result {
            tracing::warn!(
                target = "tripledger",
                event = "log_sink_append_failed",
                path = %path.display(),
                error = %e
            );
        }
    }
}

/// Log sink that drops every line; the default when the embedder does not
/// care about merge reports.
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn append(&self, _logical_file: &str, _line: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_respects_the_overwrite_flag() {
        let tmp = tempdir().expect("tempdir");
        let store = FsAttachmentStore::new(tmp.path());
        let src = tmp.path().join("a.jpg");
        let dst = tmp.path().join("b.jpg");
        fs::write(&src, b"one").expect("write src");

        assert!(store.copy(&src, &dst, false).expect("first copy"));
        fs::write(&src, b"two").expect("rewrite src");
        assert!(!store.copy(&src, &dst, false).expect("blocked copy"));
        assert_eq!(fs::read(&dst).expect("read dst"), b"one");
        assert!(store.copy(&src, &dst, true).expect("overwriting copy"));
        assert_eq!(fs::read(&dst).expect("read dst"), b"two");
    }

    #[test]
    fn delete_of_a_missing_file_reports_gone() {
        let tmp = tempdir().expect("tempdir");
        let store = FsAttachmentStore::new(tmp.path());
        assert!(store.delete(&tmp.path().join("nothing.png")));
    }

    #[test]
    fn resolve_nests_under_the_trip_directory() {
        let store = FsAttachmentStore::new("/data/receipts");
        assert_eq!(
            store.resolve("Paris", "1_Dinner.jpg"),
            PathBuf::from("/data/receipts/Paris/1_Dinner.jpg")
        );
    }

    #[test]
    fn file_log_sink_appends_lines() {
        let tmp = tempdir().expect("tempdir");
        let sink = FileLogSink::new(tmp.path());
        sink.append("import.log", "first");
        sink.append("import.log", "second");
        let contents = fs::read_to_string(tmp.path().join("import.log")).expect("read log");
        assert_eq!(contents, "first\nsecond\n");
    }
}
