use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

fn backup_sibling(db_path: &Path, file_name: String) -> PathBuf {
    db_path
        .parent()
        .map(|dir| dir.join(&file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Best-effort copy of the store file to `<name>.<oldVersion>.bak` before an
/// upgrade touches it. Failure is logged and ignored; the upgrade proceeds.
pub(crate) fn upgrade_backup(db_path: &Path, old_version: i64) {
    let name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store.db".to_string());
    let target = backup_sibling(db_path, format!("{name}.{old_version}.bak"));
    match std::fs::copy(db_path, &target) {
        Ok(_) => {
            debug!(target = "tripledger", event = "upgrade_backup", path = %target.display());
        }
        Err(e) => {
            warn!(
                target = "tripledger",
                event = "upgrade_backup_failed",
                path = %target.display(),
                error = %e
            );
        }
    }
}

/// Parks a dated copy of the store file (`<YYYY-MM-DD>_<name>.bak`) on a
/// blocking worker. Fired after a successful trip insert; one copy per day,
/// later inserts overwrite it.
pub(crate) fn spawn_periodic_backup(db_path: PathBuf) {
    tokio::task::spawn_blocking(move || {
        let name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.db".to_string());
        let date = Local::now().format("%Y-%m-%d");
        let target = backup_sibling(&db_path, format!("{date}_{name}.bak"));
        match std::fs::copy(&db_path, &target) {
            Ok(_) => {
                debug!(target = "tripledger", event = "periodic_backup", path = %target.display());
            }
            Err(e) => {
                warn!(
                    target = "tripledger",
                    event = "periodic_backup_failed",
                    path = %target.display(),
                    error = %e
                );
            }
        }
    });
}
