//! The bead (work item) graph.
//!
//! Beads carry status, priority, typed dependencies, labels, and comments.
//! Only `blocks` dependencies feed the blocked cache, which keeps the
//! ready-bead query from walking the graph. Deletion is soft; queries
//! exclude tombstones unless asked otherwise. Callers may pass any unique
//! substring of a bead id wherever an id is expected.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use hive_store::{Param, Result, Row, StoreError};

use crate::events::{append_in_tx, BeadStatus, EventPayload, IssueType, Relationship};
use crate::Kernel;

#[derive(Debug, Clone, Serialize)]
pub struct Bead {
    pub id: String,
    pub project_key: String,
    pub title: String,
    pub description: Option<String>,
    pub issue_type: IssueType,
    pub status: BeadStatus,
    pub priority: i64,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub closed_at: Option<i64>,
    pub closed_reason: Option<String>,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<String>,
    pub delete_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBeadOptions {
    pub description: Option<String>,
    pub issue_type: IssueType,
    /// 0 is highest; the default matches `bead_created`'s projection default.
    pub priority: Option<i64>,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BeadUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BeadFilter {
    pub status: Option<BeadStatus>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,
    pub include_deleted: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,
    pub bead_id: String,
    pub author: String,
    pub body: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

const BEAD_COLUMNS: &str = "id, project_key, title, description, issue_type, status, priority, \
     parent_id, assignee, created_at, updated_at, closed_at, closed_reason, \
     deleted_at, deleted_by, delete_reason";

fn map_bead(row: &Row) -> Result<Bead> {
    Ok(Bead {
        id: row.get_str("id")?.to_string(),
        project_key: row.get_str("project_key")?.to_string(),
        title: row.get_str("title")?.to_string(),
        description: row.opt_str("description")?.map(|s| s.to_string()),
        issue_type: IssueType::parse(row.get_str("issue_type")?)?,
        status: BeadStatus::parse(row.get_str("status")?)?,
        priority: row.get_i64("priority")?,
        parent_id: row.opt_str("parent_id")?.map(|s| s.to_string()),
        assignee: row.opt_str("assignee")?.map(|s| s.to_string()),
        created_at: row.get_i64("created_at")?,
        updated_at: row.get_i64("updated_at")?,
        closed_at: row.opt_i64("closed_at")?,
        closed_reason: row.opt_str("closed_reason")?.map(|s| s.to_string()),
        deleted_at: row.opt_i64("deleted_at")?,
        deleted_by: row.opt_str("deleted_by")?.map(|s| s.to_string()),
        delete_reason: row.opt_str("delete_reason")?.map(|s| s.to_string()),
    })
}

/// Opaque bead id: project hash + time + randomness, `bd-` prefixed.
fn generate_bead_id(project: &str, now_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(now_ms.to_le_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("bd-{}", &digest[..12])
}

impl Kernel {
    pub fn create_bead(
        &self,
        project: &str,
        title: &str,
        opts: CreateBeadOptions,
    ) -> Result<Bead> {
        if title.trim().is_empty() {
            return Err(Self::invalid("bead title must not be empty"));
        }
        let now = Self::now_ms();
        let bead_id = generate_bead_id(project, now);
        self.mutate(|tx| {
            if let Some(parent) = &opts.parent_id {
                let parents = tx.query(
                    &format!("SELECT {BEAD_COLUMNS} FROM beads WHERE project_key = ? AND id = ?"),
                    &[Param::from(project), Param::from(parent.as_str())],
                )?;
                let parent_bead = parents
                    .first()
                    .map(map_bead)
                    .transpose()?
                    .ok_or_else(|| StoreError::NotFound(format!("parent bead `{parent}`")))?;
                if parent_bead.issue_type != IssueType::Epic {
                    return Err(Self::invalid(format!("parent `{parent}` is not an epic")));
                }
                if parent_bead.status == BeadStatus::Closed {
                    return Err(StoreError::Conflict(format!(
                        "cannot add a child to closed epic `{parent}`"
                    )));
                }
            }
            let event = append_in_tx(
                tx,
                project,
                EventPayload::BeadCreated {
                    bead_id: bead_id.clone(),
                    title: title.to_string(),
                    description: opts.description.clone(),
                    issue_type: opts.issue_type,
                    priority: opts.priority.unwrap_or(2),
                    parent_id: opts.parent_id.clone(),
                    assignee: opts.assignee.clone(),
                },
                now,
            )?;
            let rows = tx.query(
                &format!("SELECT {BEAD_COLUMNS} FROM beads WHERE id = ?"),
                &[Param::from(bead_id.as_str())],
            )?;
            let bead = rows
                .first()
                .map(map_bead)
                .transpose()?
                .ok_or_else(|| StoreError::Corruption("bead missing after create".into()))?;
            Ok((bead, vec![event]))
        })
    }

    /// Resolve an id or any unique substring of one. Ambiguity is a
    /// `Conflict`; no match is `NotFound`.
    pub fn resolve_short_id(&self, project: &str, fragment: &str) -> Result<String> {
        if fragment.is_empty() {
            return Err(Self::invalid("empty bead id"));
        }
        let rows = self.db().query(
            "SELECT id FROM beads WHERE project_key = ? AND id LIKE ?",
            &[Param::from(project), Param::Text(format!("%{fragment}%"))],
        )?;
        let mut ids: Vec<String> = rows
            .iter()
            .map(|r| Ok(r.get_str("id")?.to_string()))
            .collect::<Result<_>>()?;
        if let Some(exact) = ids.iter().find(|id| id.as_str() == fragment) {
            return Ok(exact.clone());
        }
        match ids.len() {
            0 => Err(StoreError::NotFound(format!("no bead matching `{fragment}`"))),
            1 => Ok(ids.remove(0)),
            n => Err(StoreError::Conflict(format!(
                "`{fragment}` is ambiguous: {n} beads match"
            ))),
        }
    }

    pub fn get_bead(&self, project: &str, id_or_fragment: &str) -> Result<Bead> {
        let id = self.resolve_short_id(project, id_or_fragment)?;
        let rows = self.db().query(
            &format!("SELECT {BEAD_COLUMNS} FROM beads WHERE project_key = ? AND id = ?"),
            &[Param::from(project), Param::from(id.as_str())],
        )?;
        rows.first()
            .map(map_bead)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(format!("bead `{id}`")))
    }

    pub fn query_beads(&self, project: &str, filter: &BeadFilter) -> Result<Vec<Bead>> {
        let mut sql = format!("SELECT {BEAD_COLUMNS} FROM beads WHERE project_key = ?");
        let mut params = vec![Param::from(project)];
        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(Param::from(status.as_str()));
        }
        if let Some(issue_type) = filter.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Param::from(issue_type.as_str()));
        }
        if let Some(assignee) = &filter.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Param::from(assignee.clone()));
        }
        if let Some(parent) = &filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            params.push(Param::from(parent.clone()));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(Param::I64(limit));
        }
        if let Some(offset) = filter.offset {
            if filter.limit.is_none() {
                sql.push_str(" LIMIT ?");
                params.push(Param::I64(i64::MAX));
            }
            sql.push_str(" OFFSET ?");
            params.push(Param::I64(offset));
        }
        let rows = self.db().query(&sql, &params)?;
        rows.iter().map(map_bead).collect()
    }

    pub fn update_bead(&self, project: &str, id: &str, update: BeadUpdate) -> Result<Bead> {
        let id = self.resolve_short_id(project, id)?;
        self.append_event(
            project,
            EventPayload::BeadUpdated {
                bead_id: id.clone(),
                title: update.title,
                description: update.description,
                priority: update.priority,
                assignee: update.assignee,
            },
        )?;
        self.get_bead(project, &id)
    }

    /// Transition a bead to any status except `tombstone` (which only
    /// deletion reaches). Leaving `closed` clears the closure marker.
    pub fn change_bead_status(&self, project: &str, id: &str, to: BeadStatus) -> Result<Bead> {
        if to == BeadStatus::Tombstone {
            return Err(Self::invalid(
                "tombstone is reached through delete_bead, not a status change",
            ));
        }
        let bead = self.get_bead(project, id)?;
        self.append_event(
            project,
            EventPayload::BeadStatusChanged {
                bead_id: bead.id.clone(),
                from: Some(bead.status),
                to,
            },
        )?;
        self.get_bead(project, &bead.id)
    }

    pub fn close_bead(&self, project: &str, id: &str, reason: Option<&str>) -> Result<Bead> {
        let id = self.resolve_short_id(project, id)?;
        self.append_event(
            project,
            EventPayload::BeadClosed {
                bead_id: id.clone(),
                reason: reason.map(|s| s.to_string()),
            },
        )?;
        self.get_bead(project, &id)
    }

    pub fn reopen_bead(&self, project: &str, id: &str) -> Result<Bead> {
        let id = self.resolve_short_id(project, id)?;
        self.append_event(project, EventPayload::BeadReopened { bead_id: id.clone() })?;
        self.get_bead(project, &id)
    }

    /// Soft-delete: the bead becomes a tombstone and drops out of queries
    /// unless `include_deleted` is set.
    pub fn delete_bead(
        &self,
        project: &str,
        id: &str,
        deleted_by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        let id = self.resolve_short_id(project, id)?;
        self.append_event(
            project,
            EventPayload::BeadDeleted {
                bead_id: id,
                deleted_by: deleted_by.map(|s| s.to_string()),
                reason: reason.map(|s| s.to_string()),
            },
        )?;
        Ok(())
    }

    pub fn add_dependency(
        &self,
        project: &str,
        bead: &str,
        depends_on: &str,
        relationship: Relationship,
    ) -> Result<()> {
        let bead_id = self.resolve_short_id(project, bead)?;
        let depends_on_id = self.resolve_short_id(project, depends_on)?;
        if bead_id == depends_on_id {
            return Err(Self::invalid("a bead cannot depend on itself"));
        }
        self.append_event(
            project,
            EventPayload::BeadDependencyAdded {
                bead_id,
                depends_on_id,
                relationship,
            },
        )?;
        Ok(())
    }

    pub fn remove_dependency(
        &self,
        project: &str,
        bead: &str,
        depends_on: &str,
        relationship: Relationship,
    ) -> Result<()> {
        let bead_id = self.resolve_short_id(project, bead)?;
        let depends_on_id = self.resolve_short_id(project, depends_on)?;
        self.append_event(
            project,
            EventPayload::BeadDependencyRemoved {
                bead_id,
                depends_on_id,
                relationship,
            },
        )?;
        Ok(())
    }

    /// Outgoing dependencies of a bead.
    pub fn get_dependencies(
        &self,
        project: &str,
        bead: &str,
    ) -> Result<Vec<(String, Relationship)>> {
        let id = self.resolve_short_id(project, bead)?;
        let rows = self.db().query(
            "SELECT depends_on_id, relationship FROM bead_dependencies
             WHERE bead_id = ? ORDER BY depends_on_id",
            &[Param::from(id.as_str())],
        )?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.get_str("depends_on_id")?.to_string(),
                    Relationship::parse(r.get_str("relationship")?)?,
                ))
            })
            .collect()
    }

    /// Beads that depend on this one.
    pub fn get_dependents(&self, project: &str, bead: &str) -> Result<Vec<(String, Relationship)>> {
        let id = self.resolve_short_id(project, bead)?;
        let rows = self.db().query(
            "SELECT bead_id, relationship FROM bead_dependencies
             WHERE depends_on_id = ? ORDER BY bead_id",
            &[Param::from(id.as_str())],
        )?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.get_str("bead_id")?.to_string(),
                    Relationship::parse(r.get_str("relationship")?)?,
                ))
            })
            .collect()
    }

    /// Blocked iff the cache has blockers, or a live `blocks` target still
    /// exists (belt and braces against a stale cache).
    pub fn is_blocked(&self, project: &str, bead: &str) -> Result<bool> {
        let id = self.resolve_short_id(project, bead)?;
        if !self.get_blockers(project, &id)?.is_empty() {
            return Ok(true);
        }
        let rows = self.db().query(
            "SELECT COUNT(*) AS n FROM bead_dependencies d
             JOIN beads b ON b.id = d.depends_on_id
             WHERE d.bead_id = ? AND d.relationship = 'blocks'
               AND b.status IN ('open', 'in_progress', 'blocked')
               AND b.deleted_at IS NULL",
            &[Param::from(id.as_str())],
        )?;
        Ok(rows.first().map_or(Ok(0), |r| r.get_i64("n"))? > 0)
    }

    pub fn get_blockers(&self, project: &str, bead: &str) -> Result<Vec<String>> {
        let id = self.resolve_short_id(project, bead)?;
        let rows = self.db().query(
            "SELECT blocker_id FROM blocked_beads WHERE bead_id = ? ORDER BY blocker_id",
            &[Param::from(id.as_str())],
        )?;
        rows.iter()
            .map(|r| Ok(r.get_str("blocker_id")?.to_string()))
            .collect()
    }

    pub fn add_label(&self, project: &str, bead: &str, label: &str) -> Result<()> {
        let id = self.resolve_short_id(project, bead)?;
        self.append_event(
            project,
            EventPayload::BeadLabelAdded {
                bead_id: id,
                label: label.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn remove_label(&self, project: &str, bead: &str, label: &str) -> Result<()> {
        let id = self.resolve_short_id(project, bead)?;
        self.append_event(
            project,
            EventPayload::BeadLabelRemoved {
                bead_id: id,
                label: label.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn get_labels(&self, project: &str, bead: &str) -> Result<Vec<String>> {
        let id = self.resolve_short_id(project, bead)?;
        let rows = self.db().query(
            "SELECT label FROM bead_labels WHERE bead_id = ? ORDER BY label",
            &[Param::from(id.as_str())],
        )?;
        rows.iter()
            .map(|r| Ok(r.get_str("label")?.to_string()))
            .collect()
    }

    pub fn add_comment(
        &self,
        project: &str,
        bead: &str,
        author: &str,
        body: &str,
        parent_comment: Option<&str>,
    ) -> Result<String> {
        let bead_id = self.resolve_short_id(project, bead)?;
        let comment_id = Uuid::new_v4().to_string();
        self.append_event(
            project,
            EventPayload::BeadCommentAdded {
                comment_id: comment_id.clone(),
                bead_id,
                author: author.to_string(),
                body: body.to_string(),
                parent_id: parent_comment.map(|s| s.to_string()),
            },
        )?;
        Ok(comment_id)
    }

    pub fn update_comment(&self, project: &str, comment_id: &str, body: &str) -> Result<()> {
        let rows = self.db().query(
            "SELECT id FROM bead_comments WHERE id = ? AND project_key = ?",
            &[Param::from(comment_id), Param::from(project)],
        )?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("comment `{comment_id}`")));
        }
        self.append_event(
            project,
            EventPayload::BeadCommentUpdated {
                comment_id: comment_id.to_string(),
                body: body.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn delete_comment(&self, project: &str, comment_id: &str) -> Result<()> {
        let rows = self.db().query(
            "SELECT id FROM bead_comments WHERE id = ? AND project_key = ?",
            &[Param::from(comment_id), Param::from(project)],
        )?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("comment `{comment_id}`")));
        }
        self.append_event(
            project,
            EventPayload::BeadCommentDeleted {
                comment_id: comment_id.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn get_comments(&self, project: &str, bead: &str) -> Result<Vec<Comment>> {
        let id = self.resolve_short_id(project, bead)?;
        let rows = self.db().query(
            "SELECT id, bead_id, author, body, parent_id, created_at, updated_at
             FROM bead_comments WHERE bead_id = ? ORDER BY created_at, id",
            &[Param::from(id.as_str())],
        )?;
        rows.iter()
            .map(|r| {
                Ok(Comment {
                    id: r.get_str("id")?.to_string(),
                    bead_id: r.get_str("bead_id")?.to_string(),
                    author: r.get_str("author")?.to_string(),
                    body: r.get_str("body")?.to_string(),
                    parent_id: r.opt_str("parent_id")?.map(|s| s.to_string()),
                    created_at: r.get_i64("created_at")?,
                    updated_at: r.get_i64("updated_at")?,
                })
            })
            .collect()
    }

    pub fn add_child_to_epic(&self, project: &str, epic: &str, child: &str) -> Result<()> {
        let epic_id = self.resolve_short_id(project, epic)?;
        let child_id = self.resolve_short_id(project, child)?;
        let epic_bead = self.get_bead(project, &epic_id)?;
        if epic_bead.issue_type != IssueType::Epic {
            return Err(Self::invalid(format!("`{epic_id}` is not an epic")));
        }
        if epic_bead.status == BeadStatus::Closed {
            return Err(StoreError::Conflict(format!(
                "cannot add a child to closed epic `{epic_id}`"
            )));
        }
        self.append_event(project, EventPayload::EpicChildAdded { epic_id, child_id })?;
        Ok(())
    }

    pub fn remove_child_from_epic(&self, project: &str, epic: &str, child: &str) -> Result<()> {
        let epic_id = self.resolve_short_id(project, epic)?;
        let child_id = self.resolve_short_id(project, child)?;
        self.append_event(project, EventPayload::EpicChildRemoved { epic_id, child_id })?;
        Ok(())
    }

    pub fn get_epic_children(&self, project: &str, epic: &str) -> Result<Vec<Bead>> {
        let epic_id = self.resolve_short_id(project, epic)?;
        self.query_beads(
            project,
            &BeadFilter {
                parent_id: Some(epic_id),
                include_deleted: true,
                ..Default::default()
            },
        )
    }

    /// An epic may close once every child is closed or tombstoned.
    pub fn is_epic_closure_eligible(&self, project: &str, epic: &str) -> Result<bool> {
        let epic_id = self.resolve_short_id(project, epic)?;
        let rows = self.db().query(
            "SELECT COUNT(*) AS n FROM beads
             WHERE project_key = ? AND parent_id = ?
               AND status NOT IN ('closed', 'tombstone')",
            &[Param::from(project), Param::from(epic_id.as_str())],
        )?;
        Ok(rows.first().map_or(Ok(0), |r| r.get_i64("n"))? == 0)
    }

    /// The open, unblocked bead with the smallest priority; ties break on
    /// age.
    pub fn next_ready_bead(&self, project: &str) -> Result<Option<Bead>> {
        let rows = self.db().query(
            &format!(
                "SELECT {BEAD_COLUMNS} FROM beads
                 WHERE project_key = ? AND status = 'open' AND deleted_at IS NULL
                   AND id NOT IN (SELECT bead_id FROM blocked_beads WHERE project_key = ?)
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1"
            ),
            &[Param::from(project), Param::from(project)],
        )?;
        rows.first().map(map_bead).transpose()
    }

    pub fn in_progress_beads(&self, project: &str) -> Result<Vec<Bead>> {
        self.query_beads(
            project,
            &BeadFilter {
                status: Some(BeadStatus::InProgress),
                ..Default::default()
            },
        )
    }

    /// Beads currently blocked: cached blockers, or an explicit `blocked`
    /// status.
    pub fn blocked_beads(&self, project: &str) -> Result<Vec<Bead>> {
        let rows = self.db().query(
            &format!(
                "SELECT {BEAD_COLUMNS} FROM beads
                 WHERE project_key = ? AND deleted_at IS NULL
                   AND (status = 'blocked'
                        OR id IN (SELECT bead_id FROM blocked_beads WHERE project_key = ?))
                 ORDER BY priority ASC, created_at ASC"
            ),
            &[Param::from(project), Param::from(project)],
        )?;
        rows.iter().map(map_bead).collect()
    }

    /// Recompute one bead's blocked cache from its current `blocks`
    /// dependencies. Projections keep the cache fresh on their own; this is
    /// the manual repair hook.
    pub fn rebuild_blocked_cache(&self, project: &str, bead: &str) -> Result<()> {
        let id = self.resolve_short_id(project, bead)?;
        self.db()
            .transaction(|tx| crate::projections::rebuild_blocked_cache(tx, project, &id))
    }

    /// Beads mutated since the last successful export.
    pub fn dirty_beads(&self, project: &str) -> Result<Vec<Bead>> {
        let rows = self.db().query(
            &format!(
                "SELECT {BEAD_COLUMNS} FROM beads
                 WHERE project_key = ? AND dirty = ?
                 ORDER BY created_at ASC"
            ),
            &[Param::from(project), Param::Bool(true)],
        )?;
        rows.iter().map(map_bead).collect()
    }

    /// Clear dirty flags after a successful export.
    pub fn clear_dirty(&self, project: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut params = vec![Param::Bool(false), Param::from(project)];
        params.extend(ids.iter().map(|id| Param::from(id.as_str())));
        self.db().query(
            &format!(
                "UPDATE beads SET dirty = ? WHERE project_key = ? AND id IN ({placeholders})"
            ),
            &params,
        )?;
        Ok(())
    }
}
