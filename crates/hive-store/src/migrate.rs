//! Forward-only migration runner.
//!
//! Callers hand over an ordered list of [`Migration`]s; the runner applies
//! every version not yet recorded in `schema_version` inside a single
//! transaction and aborts wholesale on any failure. DDL must be idempotent
//! (`IF NOT EXISTS`) so a half-initialized database can be repaired by
//! rerunning.

use std::collections::HashSet;

use crate::error::{Result, StoreError};
use crate::{Db, Dialect, Param, Tx};

/// One schema step. `up` receives the open transaction and the active
/// dialect. There is no `down`; history only moves forward.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: fn(&mut Tx<'_>, Dialect) -> Result<()>,
}

/// Apply all pending migrations. Version numbers must be unique across every
/// feature domain sharing the schema; a collision is a hard bug surfaced as
/// `Fatal` before anything runs.
pub fn run_migrations(db: &Db, migrations: &[Migration]) -> Result<()> {
    let mut seen = HashSet::new();
    for m in migrations {
        if !seen.insert(m.version) {
            return Err(StoreError::Fatal(format!(
                "duplicate migration version {}",
                m.version
            )));
        }
    }

    db.exec(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version BIGINT PRIMARY KEY,
           description TEXT NOT NULL,
           applied_at BIGINT NOT NULL
         )",
    )?;

    db.transaction(|tx| {
        let applied: HashSet<i64> = tx
            .query("SELECT version FROM schema_version", &[])?
            .iter()
            .map(|r| r.get_i64("version"))
            .collect::<Result<_>>()?;

        let mut pending: Vec<&Migration> =
            migrations.iter().filter(|m| !applied.contains(&m.version)).collect();
        pending.sort_by_key(|m| m.version);

        let now = chrono_now_ms();
        let dialect = tx.dialect();
        for m in pending {
            tracing::info!(version = m.version, description = m.description, "applying migration");
            (m.up)(tx, dialect).map_err(|e| {
                StoreError::Fatal(format!("migration {} ({}) failed: {e}", m.version, m.description))
            })?;
            tx.query(
                "INSERT INTO schema_version (version, description, applied_at) VALUES (?, ?, ?)",
                &[
                    Param::I64(m.version),
                    Param::from(m.description),
                    Param::I64(now),
                ],
            )?;
        }
        Ok(())
    })
}

fn chrono_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_t(tx: &mut Tx<'_>, _dialect: Dialect) -> Result<()> {
        tx.exec("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)")
    }

    fn failing(_tx: &mut Tx<'_>, _dialect: Dialect) -> Result<()> {
        Err(StoreError::Invalid("deliberate".into()))
    }

    #[test]
    fn applies_pending_and_records_versions() {
        let db = Db::open_sqlite_memory().unwrap();
        let migs = [Migration {
            version: 1,
            description: "create t",
            up: create_t,
        }];
        run_migrations(&db, &migs).unwrap();
        let rows = db.query("SELECT version FROM schema_version", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("version").unwrap(), 1);
    }

    #[test]
    fn rerun_is_a_no_op() {
        let db = Db::open_sqlite_memory().unwrap();
        let migs = [Migration {
            version: 1,
            description: "create t",
            up: create_t,
        }];
        run_migrations(&db, &migs).unwrap();
        run_migrations(&db, &migs).unwrap();
        let rows = db.query("SELECT version FROM schema_version", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn duplicate_version_is_fatal() {
        let db = Db::open_sqlite_memory().unwrap();
        let migs = [
            Migration {
                version: 1,
                description: "a",
                up: create_t,
            },
            Migration {
                version: 1,
                description: "b",
                up: create_t,
            },
        ];
        let err = run_migrations(&db, &migs).unwrap_err();
        assert!(matches!(err, StoreError::Fatal(_)));
    }

    #[test]
    fn failure_aborts_the_whole_run() {
        let db = Db::open_sqlite_memory().unwrap();
        let migs = [
            Migration {
                version: 1,
                description: "create t",
                up: create_t,
            },
            Migration {
                version: 2,
                description: "fails",
                up: failing,
            },
        ];
        let err = run_migrations(&db, &migs).unwrap_err();
        assert!(matches!(err, StoreError::Fatal(_)));
        // Version 1 must not be recorded either.
        let rows = db.query("SELECT version FROM schema_version", &[]).unwrap();
        assert!(rows.is_empty());
    }
}
