//! One-shot import from a legacy memory database.
//!
//! On first construction per process, if the legacy SQLite file exists and
//! the target table is empty, its rows are copied over in one transaction.
//! Import errors are logged and swallowed; the store continues empty. The
//! check is guarded by a process-wide flag so later constructions skip it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use hive_store::{Db, Result};

use crate::{apply_stored, EMBEDDING_DIM};

static LEGACY_CHECKED: AtomicBool = AtomicBool::new(false);

/// Test hook: forget that the legacy check already ran.
pub fn reset_migration_check() {
    LEGACY_CHECKED.store(false, Ordering::SeqCst);
}

/// Run the legacy import if it has not been attempted in this process.
pub fn maybe_import_legacy(db: &Db, project_key: &str, legacy_path: &Path) {
    if LEGACY_CHECKED.swap(true, Ordering::SeqCst) {
        return;
    }
    if !legacy_path.exists() {
        return;
    }
    match import_legacy(db, project_key, legacy_path) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, path = %legacy_path.display(), "imported legacy memories"),
        Err(e) => {
            tracing::warn!(error = %e, path = %legacy_path.display(), "legacy memory import failed; continuing with empty store");
        }
    }
}

fn import_legacy(db: &Db, project_key: &str, legacy_path: &Path) -> Result<usize> {
    let existing = db.query("SELECT COUNT(*) AS n FROM memories", &[])?;
    if existing.first().map(|r| r.get_i64("n")).transpose()?.unwrap_or(0) > 0 {
        return Ok(0);
    }

    let legacy = rusqlite::Connection::open_with_flags(
        legacy_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .map_err(|e| hive_store::StoreError::Unavailable(format!("legacy db open: {e}")))?;

    let mut stmt = legacy
        .prepare("SELECT id, content, metadata, embedding, created_at FROM memories")
        .map_err(|e| hive_store::StoreError::Invalid(format!("legacy schema: {e}")))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| hive_store::StoreError::Invalid(format!("legacy query: {e}")))?;

    let mut imported: Vec<(String, String, serde_json::Value, Vec<f32>, i64)> = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| hive_store::StoreError::Invalid(format!("legacy read: {e}")))?
    {
        let id: String = row.get(0).unwrap_or_default();
        let content: String = row.get(1).unwrap_or_default();
        let metadata: serde_json::Value = row
            .get::<_, Option<String>>(2)
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        let embedding: Vec<f32> = row
            .get::<_, Option<String>>(3)
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str::<Vec<f32>>(&s).ok())
            .unwrap_or_default();
        let created_at: i64 = row.get::<_, Option<i64>>(4).ok().flatten().unwrap_or(0);
        if id.is_empty() || content.is_empty() || embedding.len() != EMBEDDING_DIM {
            continue;
        }
        imported.push((id, content, metadata, embedding, created_at));
    }

    let count = imported.len();
    db.transaction(|tx| {
        for (id, content, metadata, embedding, created_at) in &imported {
            apply_stored(
                tx,
                id,
                project_key,
                content,
                &[],
                metadata,
                "default",
                0.7,
                embedding,
                *created_at,
            )?;
        }
        Ok(())
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_store::{run_migrations, Param};
    use std::sync::Mutex;

    // The one-shot flag is process-wide; serialize tests that touch it.
    static FLAG_LOCK: Mutex<()> = Mutex::new(());

    fn fresh_db() -> Db {
        let db = Db::open_sqlite_memory().unwrap();
        run_migrations(&db, &crate::migrations()).unwrap();
        db
    }

    fn write_legacy(path: &Path, rows: usize) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE memories (
               id TEXT PRIMARY KEY, content TEXT, metadata TEXT,
               embedding TEXT, created_at INTEGER
             )",
        )
        .unwrap();
        for i in 0..rows {
            let embedding = vec![0.1f32; EMBEDDING_DIM];
            conn.execute(
                "INSERT INTO memories (id, content, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    format!("mem_legacy{i}"),
                    format!("legacy fact {i}"),
                    "{}",
                    serde_json::to_string(&embedding).unwrap(),
                    1_700_000_000_000i64 + i as i64,
                ],
            )
            .unwrap();
        }
    }

    #[test]
    fn imports_once_and_skips_when_flagged() {
        let _guard = FLAG_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let legacy_path = dir.path().join("legacy.sqlite");
        write_legacy(&legacy_path, 2);

        reset_migration_check();
        let db = fresh_db();
        maybe_import_legacy(&db, "proj", &legacy_path);
        let n = db.query("SELECT COUNT(*) AS n FROM memories", &[]).unwrap()[0]
            .get_i64("n")
            .unwrap();
        assert_eq!(n, 2);

        // Flag is set: a second database sees no import.
        let db2 = fresh_db();
        maybe_import_legacy(&db2, "proj", &legacy_path);
        let n2 = db2.query("SELECT COUNT(*) AS n FROM memories", &[]).unwrap()[0]
            .get_i64("n")
            .unwrap();
        assert_eq!(n2, 0);
    }

    #[test]
    fn missing_legacy_file_is_a_no_op() {
        let _guard = FLAG_LOCK.lock().unwrap();
        reset_migration_check();
        let db = fresh_db();
        maybe_import_legacy(&db, "proj", Path::new("/nonexistent/legacy.sqlite"));
        let n = db.query("SELECT COUNT(*) AS n FROM memories", &[]).unwrap()[0]
            .get_i64("n")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn non_empty_target_is_left_alone() {
        let _guard = FLAG_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let legacy_path = dir.path().join("legacy.sqlite");
        write_legacy(&legacy_path, 3);

        let db = fresh_db();
        db.query(
            "INSERT INTO memories (id, project_key, content, created_at)
             VALUES (?, ?, ?, ?)",
            &[
                Param::from("mem_existing"),
                Param::from("proj"),
                Param::from("already here"),
                Param::I64(1),
            ],
        )
        .unwrap();

        reset_migration_check();
        maybe_import_legacy(&db, "proj", &legacy_path);
        let n = db.query("SELECT COUNT(*) AS n FROM memories", &[]).unwrap()[0]
            .get_i64("n")
            .unwrap();
        assert_eq!(n, 1);
    }
}
