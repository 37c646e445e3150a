//! Kernel DDL, per backend.
//!
//! Every dialect difference that is not query-shaped lives here: the
//! auto-increment form of the journal, JSON column types, boolean columns.
//! Version numbers are spaced per feature domain (events 10, messaging 20,
//! reservations 30, beads 40, memory 60) and must stay unique across the
//! whole list; the runner aborts on collision.

use hive_store::{Dialect, Migration, Result, Tx};

/// Kernel migrations plus the memory domain's, in one shared version space.
pub fn all_migrations() -> Vec<Migration> {
    let mut migrations = vec![
        Migration {
            version: 10,
            description: "event journal",
            up: create_events,
        },
        Migration {
            version: 20,
            description: "agents and messages",
            up: create_messaging,
        },
        Migration {
            version: 30,
            description: "file reservations",
            up: create_reservations,
        },
        Migration {
            version: 40,
            description: "beads, dependencies, labels, comments, blocked cache",
            up: create_beads,
        },
    ];
    migrations.extend(hive_memory_core::migrations());
    migrations
}

fn create_events(tx: &mut Tx<'_>, dialect: Dialect) -> Result<()> {
    match dialect {
        Dialect::Sqlite => tx.exec(
            "CREATE TABLE IF NOT EXISTS events (
               sequence INTEGER PRIMARY KEY AUTOINCREMENT,
               kind TEXT NOT NULL,
               project_key TEXT NOT NULL,
               timestamp_ms BIGINT NOT NULL,
               payload TEXT NOT NULL
             );",
        )?,
        Dialect::Postgres => tx.exec(
            "CREATE TABLE IF NOT EXISTS events (
               sequence BIGSERIAL PRIMARY KEY,
               kind TEXT NOT NULL,
               project_key TEXT NOT NULL,
               timestamp_ms BIGINT NOT NULL,
               payload JSONB NOT NULL
             );",
        )?,
    }
    tx.exec(
        "CREATE INDEX IF NOT EXISTS idx_events_project_seq
           ON events(project_key, sequence);
         CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
         CREATE INDEX IF NOT EXISTS idx_events_time ON events(timestamp_ms);",
    )
}

fn create_messaging(tx: &mut Tx<'_>, dialect: Dialect) -> Result<()> {
    let json = json_type(dialect);
    tx.exec(&format!(
        "CREATE TABLE IF NOT EXISTS agents (
           project_key TEXT NOT NULL,
           name TEXT NOT NULL,
           program TEXT,
           model TEXT,
           task_description TEXT,
           registered_at BIGINT NOT NULL,
           last_active_at BIGINT NOT NULL,
           PRIMARY KEY (project_key, name)
         );
         CREATE TABLE IF NOT EXISTS messages (
           id TEXT PRIMARY KEY,
           project_key TEXT NOT NULL,
           sequence BIGINT NOT NULL,
           from_agent TEXT NOT NULL,
           subject TEXT NOT NULL,
           body TEXT NOT NULL,
           thread_id TEXT,
           importance TEXT NOT NULL DEFAULT 'normal',
           metadata {json},
           sent_at BIGINT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_messages_project
           ON messages(project_key, sent_at);
         CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
         CREATE TABLE IF NOT EXISTS message_recipients (
           message_id TEXT NOT NULL,
           agent_name TEXT NOT NULL,
           read_at BIGINT,
           acked_at BIGINT,
           PRIMARY KEY (message_id, agent_name)
         );
         CREATE INDEX IF NOT EXISTS idx_recipients_agent
           ON message_recipients(agent_name);"
    ))
}

fn create_reservations(tx: &mut Tx<'_>, dialect: Dialect) -> Result<()> {
    let boolean = bool_type(dialect);
    tx.exec(&format!(
        "CREATE TABLE IF NOT EXISTS file_reservations (
           id TEXT PRIMARY KEY,
           project_key TEXT NOT NULL,
           agent_name TEXT NOT NULL,
           path_pattern TEXT NOT NULL,
           exclusive {boolean} NOT NULL,
           reason TEXT,
           acquired_at BIGINT NOT NULL,
           expires_at BIGINT,
           released_at BIGINT
         );
         CREATE INDEX IF NOT EXISTS idx_reservations_project
           ON file_reservations(project_key, released_at);
         CREATE INDEX IF NOT EXISTS idx_reservations_agent
           ON file_reservations(project_key, agent_name);"
    ))
}

fn create_beads(tx: &mut Tx<'_>, dialect: Dialect) -> Result<()> {
    let boolean = bool_type(dialect);
    tx.exec(&format!(
        "CREATE TABLE IF NOT EXISTS beads (
           id TEXT PRIMARY KEY,
           project_key TEXT NOT NULL,
           title TEXT NOT NULL,
           description TEXT,
           issue_type TEXT NOT NULL DEFAULT 'task',
           status TEXT NOT NULL DEFAULT 'open',
           priority BIGINT NOT NULL DEFAULT 2,
           parent_id TEXT,
           assignee TEXT,
           created_at BIGINT NOT NULL,
           updated_at BIGINT NOT NULL,
           closed_at BIGINT,
           closed_reason TEXT,
           deleted_at BIGINT,
           deleted_by TEXT,
           delete_reason TEXT,
           dirty {boolean} NOT NULL DEFAULT {dirty_default}
         );
         CREATE INDEX IF NOT EXISTS idx_beads_project_status
           ON beads(project_key, status);
         CREATE INDEX IF NOT EXISTS idx_beads_parent ON beads(parent_id);
         CREATE TABLE IF NOT EXISTS bead_dependencies (
           project_key TEXT NOT NULL,
           bead_id TEXT NOT NULL,
           depends_on_id TEXT NOT NULL,
           relationship TEXT NOT NULL,
           created_at BIGINT NOT NULL,
           PRIMARY KEY (bead_id, depends_on_id, relationship)
         );
         CREATE INDEX IF NOT EXISTS idx_deps_target
           ON bead_dependencies(depends_on_id, relationship);
         CREATE TABLE IF NOT EXISTS bead_labels (
           project_key TEXT NOT NULL,
           bead_id TEXT NOT NULL,
           label TEXT NOT NULL,
           PRIMARY KEY (bead_id, label)
         );
         CREATE TABLE IF NOT EXISTS bead_comments (
           id TEXT PRIMARY KEY,
           project_key TEXT NOT NULL,
           bead_id TEXT NOT NULL,
           author TEXT NOT NULL,
           body TEXT NOT NULL,
           parent_id TEXT,
           created_at BIGINT NOT NULL,
           updated_at BIGINT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_comments_bead ON bead_comments(bead_id);
         CREATE TABLE IF NOT EXISTS blocked_beads (
           project_key TEXT NOT NULL,
           bead_id TEXT NOT NULL,
           blocker_id TEXT NOT NULL,
           PRIMARY KEY (bead_id, blocker_id)
         );
         CREATE INDEX IF NOT EXISTS idx_blocked_project
           ON blocked_beads(project_key);",
        dirty_default = dirty_default(dialect),
    ))
}

fn json_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "TEXT",
        Dialect::Postgres => "JSONB",
    }
}

fn bool_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "INTEGER",
        Dialect::Postgres => "BOOLEAN",
    }
}

fn dirty_default(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "1",
        Dialect::Postgres => "TRUE",
    }
}

/// Projection tables in deletion order for `replay(clear_views: true)`.
/// The journal itself is never touched.
pub(crate) const PROJECTION_TABLES: &[&str] = &[
    "blocked_beads",
    "bead_comments",
    "bead_labels",
    "bead_dependencies",
    "beads",
    "file_reservations",
    "message_recipients",
    "messages",
    "agents",
];

#[cfg(test)]
mod tests {
    use super::*;
    use hive_store::{run_migrations, Db};

    #[test]
    fn migrations_apply_cleanly_and_rerun() {
        let db = Db::open_sqlite_memory().unwrap();
        run_migrations(&db, &all_migrations()).unwrap();
        run_migrations(&db, &all_migrations()).unwrap();
        // All projection tables exist.
        for table in PROJECTION_TABLES {
            db.query(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
                .unwrap();
        }
        db.query("SELECT COUNT(*) AS n FROM events", &[]).unwrap();
        db.query("SELECT COUNT(*) AS n FROM memories", &[]).unwrap();
    }

    #[test]
    fn version_space_has_no_collisions() {
        let migrations = all_migrations();
        let mut versions: Vec<i64> = migrations.iter().map(|m| m.version).collect();
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), migrations.len());
    }
}
