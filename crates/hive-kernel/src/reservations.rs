//! The file reservation arbiter.
//!
//! Reservations are advisory claims on glob patterns. The conflict check
//! and the journal append run inside one transaction (SQLite takes the
//! write lock at BEGIN), so two agents racing for the same pattern
//! serialize instead of double-reserving. TTL expiry is a derived truth:
//! the active predicate excludes expired rows whether or not a sweep has
//! materialized their release.

use serde::Serialize;
use uuid::Uuid;

use hive_store::{Param, Result, Row, StoreError, Tx};

use crate::events::{append_in_tx, EventPayload};
use crate::pattern::patterns_overlap;
use crate::Kernel;

#[derive(Debug, Clone)]
pub struct ReserveOptions {
    pub reason: Option<String>,
    pub exclusive: bool,
    pub ttl_seconds: Option<i64>,
}

impl Default for ReserveOptions {
    fn default() -> Self {
        Self {
            reason: None,
            exclusive: true,
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub id: String,
    pub project_key: String,
    pub agent_name: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: Option<String>,
    pub acquired_at: i64,
    pub expires_at: Option<i64>,
    pub released_at: Option<i64>,
}

const RESERVATION_COLUMNS: &str =
    "id, project_key, agent_name, path_pattern, exclusive, reason, acquired_at, expires_at, released_at";

fn map_reservation(row: &Row) -> Result<Reservation> {
    Ok(Reservation {
        id: row.get_str("id")?.to_string(),
        project_key: row.get_str("project_key")?.to_string(),
        agent_name: row.get_str("agent_name")?.to_string(),
        path_pattern: row.get_str("path_pattern")?.to_string(),
        exclusive: row.get_bool("exclusive")?,
        reason: row.opt_str("reason")?.map(|s| s.to_string()),
        acquired_at: row.get_i64("acquired_at")?,
        expires_at: row.opt_i64("expires_at")?,
        released_at: row.opt_i64("released_at")?,
    })
}

fn active_for_project(tx: &mut Tx<'_>, project: &str, now_ms: i64) -> Result<Vec<Reservation>> {
    let rows = tx.query(
        &format!(
            "SELECT {RESERVATION_COLUMNS} FROM file_reservations
             WHERE project_key = ? AND released_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?)"
        ),
        &[Param::from(project), Param::I64(now_ms)],
    )?;
    rows.iter().map(map_reservation).collect()
}

impl Kernel {
    /// Claim glob patterns for an agent.
    ///
    /// Raises `Conflict` when any overlapping active reservation is
    /// exclusive and owned by someone else, or when this claim is exclusive
    /// and anything of another agent overlaps. Retrying identical arguments
    /// while the claim is active is a no-op success.
    pub fn reserve_files(
        &self,
        project: &str,
        agent: &str,
        paths: &[String],
        opts: ReserveOptions,
    ) -> Result<Vec<Reservation>> {
        if paths.is_empty() {
            return Err(Self::invalid("reserve_files needs at least one pattern"));
        }
        let now = Self::now_ms();
        self.mutate(|tx| {
            let active = active_for_project(tx, project, now)?;

            // Idempotent retry: every requested pattern already held by this
            // agent at the same exclusivity.
            let held: Vec<&Reservation> = paths
                .iter()
                .filter_map(|p| {
                    active.iter().find(|r| {
                        r.agent_name == agent
                            && r.path_pattern == *p
                            && r.exclusive == opts.exclusive
                    })
                })
                .collect();
            if held.len() == paths.len() {
                return Ok((held.into_iter().cloned().collect(), Vec::new()));
            }

            for requested in paths {
                for existing in &active {
                    if existing.agent_name == agent {
                        continue;
                    }
                    if !patterns_overlap(requested, &existing.path_pattern) {
                        continue;
                    }
                    if existing.exclusive || opts.exclusive {
                        return Err(StoreError::Conflict(format!(
                            "`{requested}` overlaps reservation `{}` held by {}",
                            existing.path_pattern, existing.agent_name
                        )));
                    }
                }
            }

            let reservation_ids: Vec<String> =
                paths.iter().map(|_| Uuid::new_v4().to_string()).collect();
            let event = append_in_tx(
                tx,
                project,
                EventPayload::FileReserved {
                    reservation_ids: reservation_ids.clone(),
                    agent: agent.to_string(),
                    path_patterns: paths.to_vec(),
                    exclusive: opts.exclusive,
                    reason: opts.reason.clone(),
                    ttl_seconds: opts.ttl_seconds,
                },
                now,
            )?;

            // The projection skipped rows the agent already held; report the
            // active set for the requested patterns either way.
            let placeholders = vec!["?"; paths.len()].join(", ");
            let mut params = vec![Param::from(project), Param::from(agent), Param::I64(now)];
            params.extend(paths.iter().map(|p| Param::from(p.as_str())));
            let rows = tx.query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM file_reservations
                     WHERE project_key = ? AND agent_name = ? AND released_at IS NULL
                       AND (expires_at IS NULL OR expires_at > ?)
                       AND path_pattern IN ({placeholders})
                     ORDER BY acquired_at"
                ),
                &params,
            )?;
            let reservations = rows.iter().map(map_reservation).collect::<Result<Vec<_>>>()?;
            Ok((reservations, vec![event]))
        })
    }

    /// Release the agent's active reservations matching `paths`, or all of
    /// them when `paths` is `None`. Returns how many were released.
    pub fn release_files(
        &self,
        project: &str,
        agent: &str,
        paths: Option<&[String]>,
    ) -> Result<u64> {
        let now = Self::now_ms();
        self.mutate(|tx| {
            let active = active_for_project(tx, project, now)?;
            let releasing: Vec<&Reservation> = active
                .iter()
                .filter(|r| r.agent_name == agent)
                .filter(|r| match paths {
                    Some(list) => list.iter().any(|p| p == &r.path_pattern),
                    None => true,
                })
                .collect();
            if releasing.is_empty() {
                return Ok((0, Vec::new()));
            }
            let count = releasing.len() as u64;
            let event = append_in_tx(
                tx,
                project,
                EventPayload::FileReleased {
                    agent: agent.to_string(),
                    path_patterns: paths.map(|p| p.to_vec()),
                },
                now,
            )?;
            Ok((count, vec![event]))
        })
    }

    /// Active reservations for a project, expiry applied.
    pub fn active_reservations(&self, project: &str) -> Result<Vec<Reservation>> {
        let rows = self.db().query(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM file_reservations
                 WHERE project_key = ? AND released_at IS NULL
                   AND (expires_at IS NULL OR expires_at > ?)
                 ORDER BY acquired_at"
            ),
            &[Param::from(project), Param::I64(Self::now_ms())],
        )?;
        rows.iter().map(map_reservation).collect()
    }

    /// Acquire, run `f`, release on every exit path.
    pub fn with_reservation<T>(
        &self,
        project: &str,
        agent: &str,
        paths: &[String],
        opts: ReserveOptions,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        self.reserve_files(project, agent, paths, opts)?;
        let outcome = f(self);
        let released = self.release_files(project, agent, Some(paths));
        match (outcome, released) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(release_err)) => {
                tracing::warn!(error = %release_err, "release failed while unwinding");
                Err(err)
            }
        }
    }

    /// Materialize the release of reservations whose TTL has passed.
    ///
    /// Emits no event: expiry is derived from `expires_at`, and the stamped
    /// `released_at` equals `expires_at` so a replayed journal plus one
    /// sweep converges to the same bytes.
    pub fn expire_reservations(&self, now_ms: i64) -> Result<u64> {
        let rows = self.db().query(
            "UPDATE file_reservations SET released_at = expires_at
             WHERE released_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?
             RETURNING id",
            &[Param::I64(now_ms)],
        )?;
        Ok(rows.len() as u64)
    }
}
