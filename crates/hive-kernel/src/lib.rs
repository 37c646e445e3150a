//! The hive coordination kernel.
//!
//! A durable append-only event journal with projections updated in the same
//! transaction, backing five coupled subsystems: messaging, file
//! reservations, the bead (work item) graph, semantic memory, and the
//! replay/stream machinery. One database file per project; multiple
//! processes may share it, with all atomicity delegated to the database's
//! transactions.

mod beads;
mod bus;
mod events;
mod export;
mod memory;
mod messaging;
mod paths;
mod pattern;
mod projections;
mod replay;
mod reservations;
mod schema;

use std::path::Path;
use std::sync::Arc;

use hive_store::{Db, Param, Result, StoreError};

pub use beads::{Bead, BeadFilter, BeadUpdate, Comment, CreateBeadOptions};
pub use bus::{Bus, BusStats};
pub use events::{
    BeadStatus, Event, EventFilter, EventPayload, Importance, IssueType, Relationship,
};
pub use export::{export_issues, import_issues, IssueLine};
pub use hive_memory_core::{
    Embedder, EmbedderHealth, MatchType, Memory, MemoryHit, MemoryStats, EMBEDDING_DIM,
};
pub use hive_store::StoreError as KernelError;
pub use memory::{MemoryFindOptions, MemoryStoreOptions};
pub use messaging::{AgentRecord, AgentSpec, InboxEntry, InboxOptions, MessageRecord, SendOptions};
pub use paths::{hive_dir, project_db_path, state_dir};
pub use replay::{ReplayOptions, ReplayReport};
pub use reservations::{Reservation, ReserveOptions};

/// Handle to one project database: journal, projections, and the in-process
/// bus that mirrors committed events. Cheap to clone.
#[derive(Clone)]
pub struct Kernel {
    db: Arc<Db>,
    bus: Bus,
}

impl Kernel {
    /// Open the kernel for a project rooted at `project_root`.
    ///
    /// `HIVE_DB_URL` (a `postgres://` URL) routes storage to a server that
    /// holds the writer; otherwise the embedded SQLite driver opens a
    /// per-project file under the state directory.
    pub fn open_project(project_root: &Path) -> Result<Self> {
        match std::env::var("HIVE_DB_URL") {
            Ok(url) if !url.is_empty() => Self::open_with_db(Db::connect_postgres(&url)?),
            _ => {
                let db_path = paths::project_db_path(project_root);
                let busy_ms = std::env::var("HIVE_SQLITE_BUSY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000);
                Self::open_with_db(Db::open_sqlite(&db_path, busy_ms)?)
            }
        }
    }

    /// Open over an already-constructed database (tests use the in-memory
    /// SQLite variant). Runs migrations and the one-shot legacy memory
    /// import.
    pub fn open_with_db(db: Db) -> Result<Self> {
        hive_store::run_migrations(&db, &schema::all_migrations())?;
        if let Ok(legacy) = std::env::var("HIVE_LEGACY_MEMORY_DB") {
            if !legacy.is_empty() {
                hive_memory_core::maybe_import_legacy(&db, "default", Path::new(&legacy));
            }
        }
        Ok(Self {
            db: Arc::new(db),
            bus: Bus::default(),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Append one event: insert, apply projections, commit, then mirror to
    /// the bus. The event is not visible to readers before its projections
    /// are.
    pub fn append_event(&self, project_key: &str, payload: EventPayload) -> Result<Event> {
        let ts = Self::now_ms();
        let event = self
            .db
            .transaction(|tx| events::append_in_tx(tx, project_key, payload, ts))?;
        self.bus.publish(event.clone());
        Ok(event)
    }

    /// Append a batch atomically, preserving input order.
    pub fn append_events(
        &self,
        project_key: &str,
        payloads: Vec<EventPayload>,
    ) -> Result<Vec<Event>> {
        let ts = Self::now_ms();
        let appended = self.db.transaction(|tx| {
            let mut out = Vec::with_capacity(payloads.len());
            for payload in payloads {
                out.push(events::append_in_tx(tx, project_key, payload, ts)?);
            }
            Ok(out)
        })?;
        for event in &appended {
            self.bus.publish(event.clone());
        }
        Ok(appended)
    }

    /// Read events in ascending sequence order.
    pub fn read_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let (sql, params) = events::build_read_query(filter);
        let rows = self.db.query(&sql, &params)?;
        rows.iter().map(events::map_event_row).collect()
    }

    /// Highest committed sequence, 0 when empty.
    pub fn latest_sequence(&self, project_key: Option<&str>) -> Result<i64> {
        let rows = match project_key {
            Some(project) => self.db.query(
                "SELECT COALESCE(MAX(sequence), 0) AS seq FROM events WHERE project_key = ?",
                &[Param::from(project)],
            )?,
            None => self
                .db
                .query("SELECT COALESCE(MAX(sequence), 0) AS seq FROM events", &[])?,
        };
        rows.first().map_or(Ok(0), |r| r.get_i64("seq"))
    }

    /// Total journaled events, per project when given.
    pub fn event_count(&self, project_key: Option<&str>) -> Result<i64> {
        let rows = match project_key {
            Some(project) => self.db.query(
                "SELECT COUNT(*) AS n FROM events WHERE project_key = ?",
                &[Param::from(project)],
            )?,
            None => self.db.query("SELECT COUNT(*) AS n FROM events", &[])?,
        };
        rows.first().map_or(Ok(0), |r| r.get_i64("n"))
    }

    /// Run `f` in a transaction, then publish the events it appended.
    pub(crate) fn mutate<T>(
        &self,
        f: impl FnOnce(&mut hive_store::Tx<'_>) -> Result<(T, Vec<Event>)>,
    ) -> Result<T> {
        let (out, appended) = self.db.transaction(f)?;
        for event in appended {
            self.bus.publish(event);
        }
        Ok(out)
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> StoreError {
        StoreError::Invalid(msg.into())
    }
}
