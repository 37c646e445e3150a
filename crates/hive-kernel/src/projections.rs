//! The projection registry: the single place materialized views are written.
//!
//! `apply` runs inside the same transaction as the event insert (and inside
//! replay). Every rule is deterministic over the event plus current table
//! state (no wall-clock reads, no randomness), so replaying a journal
//! reproduces the projections byte for byte.

use hive_store::{Param, Result, StoreError, Tx};

use crate::events::{BeadStatus, Event, EventPayload};

pub(crate) fn apply(event: &Event, tx: &mut Tx<'_>) -> Result<()> {
    let project = event.project_key.as_str();
    let ts = event.timestamp_ms;

    match &event.payload {
        EventPayload::AgentRegistered {
            name,
            program,
            model,
            task_description,
        } => {
            tx.query(
                "INSERT INTO agents
                   (project_key, name, program, model, task_description, registered_at, last_active_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (project_key, name) DO UPDATE SET
                   program = EXCLUDED.program,
                   model = EXCLUDED.model,
                   task_description = EXCLUDED.task_description,
                   last_active_at = EXCLUDED.last_active_at",
                &[
                    Param::from(project),
                    Param::from(name.as_str()),
                    Param::from(program.clone()),
                    Param::from(model.clone()),
                    Param::from(task_description.clone()),
                    Param::I64(ts),
                    Param::I64(ts),
                ],
            )?;
        }
        EventPayload::MessageSent {
            message_id,
            from_agent,
            to_agents,
            subject,
            body,
            thread_id,
            importance,
            metadata,
        } => {
            tx.query(
                "INSERT INTO messages
                   (id, project_key, sequence, from_agent, subject, body, thread_id, importance, metadata, sent_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    Param::from(message_id.as_str()),
                    Param::from(project),
                    Param::I64(event.sequence),
                    Param::from(from_agent.as_str()),
                    Param::from(subject.as_str()),
                    Param::from(body.as_str()),
                    Param::from(thread_id.clone()),
                    Param::from(importance.as_str()),
                    Param::Json(metadata.clone()),
                    Param::I64(ts),
                ],
            )?;
            for recipient in to_agents {
                tx.query(
                    "INSERT INTO message_recipients (message_id, agent_name)
                     VALUES (?, ?)
                     ON CONFLICT (message_id, agent_name) DO NOTHING",
                    &[Param::from(message_id.as_str()), Param::from(recipient.as_str())],
                )?;
            }
        }
        EventPayload::MessageRead { message_id, agent } => {
            // Idempotent: the first read timestamp wins.
            tx.query(
                "UPDATE message_recipients SET read_at = COALESCE(read_at, ?)
                 WHERE message_id = ? AND agent_name = ?",
                &[
                    Param::I64(ts),
                    Param::from(message_id.as_str()),
                    Param::from(agent.as_str()),
                ],
            )?;
        }
        EventPayload::MessageAcked { message_id, agent } => {
            tx.query(
                "UPDATE message_recipients SET acked_at = COALESCE(acked_at, ?)
                 WHERE message_id = ? AND agent_name = ?",
                &[
                    Param::I64(ts),
                    Param::from(message_id.as_str()),
                    Param::from(agent.as_str()),
                ],
            )?;
        }
        EventPayload::FileReserved {
            reservation_ids,
            agent,
            path_patterns,
            exclusive,
            reason,
            ttl_seconds,
        } => {
            let expires_at = ttl_seconds.map(|ttl| ts + ttl * 1000);
            for (id, pattern) in reservation_ids.iter().zip(path_patterns.iter()) {
                // Idempotent retry: an equivalent active reservation means
                // this row was already materialized.
                let existing = tx.query(
                    "SELECT id FROM file_reservations
                     WHERE project_key = ? AND agent_name = ? AND path_pattern = ?
                       AND exclusive = ? AND released_at IS NULL
                       AND (expires_at IS NULL OR expires_at > ?)
                     LIMIT 1",
                    &[
                        Param::from(project),
                        Param::from(agent.as_str()),
                        Param::from(pattern.as_str()),
                        Param::Bool(*exclusive),
                        Param::I64(ts),
                    ],
                )?;
                if !existing.is_empty() {
                    continue;
                }
                tx.query(
                    "INSERT INTO file_reservations
                       (id, project_key, agent_name, path_pattern, exclusive, reason, acquired_at, expires_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (id) DO NOTHING",
                    &[
                        Param::from(id.as_str()),
                        Param::from(project),
                        Param::from(agent.as_str()),
                        Param::from(pattern.as_str()),
                        Param::Bool(*exclusive),
                        Param::from(reason.clone()),
                        Param::I64(ts),
                        Param::from(expires_at),
                    ],
                )?;
            }
        }
        EventPayload::FileReleased {
            agent,
            path_patterns,
        } => match path_patterns {
            Some(patterns) if !patterns.is_empty() => {
                let placeholders = vec!["?"; patterns.len()].join(", ");
                let mut params = vec![Param::I64(ts), Param::from(project), Param::from(agent.as_str())];
                params.extend(patterns.iter().map(|p| Param::from(p.as_str())));
                tx.query(
                    &format!(
                        "UPDATE file_reservations SET released_at = ?
                         WHERE project_key = ? AND agent_name = ? AND released_at IS NULL
                           AND path_pattern IN ({placeholders})"
                    ),
                    &params,
                )?;
            }
            _ => {
                tx.query(
                    "UPDATE file_reservations SET released_at = ?
                     WHERE project_key = ? AND agent_name = ? AND released_at IS NULL",
                    &[Param::I64(ts), Param::from(project), Param::from(agent.as_str())],
                )?;
            }
        },
        EventPayload::BeadCreated {
            bead_id,
            title,
            description,
            issue_type,
            priority,
            parent_id,
            assignee,
        } => {
            tx.query(
                "INSERT INTO beads
                   (id, project_key, title, description, issue_type, status, priority,
                    parent_id, assignee, created_at, updated_at, dirty)
                 VALUES (?, ?, ?, ?, ?, 'open', ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    Param::from(bead_id.as_str()),
                    Param::from(project),
                    Param::from(title.as_str()),
                    Param::from(description.clone()),
                    Param::from(issue_type.as_str()),
                    Param::I64(*priority),
                    Param::from(parent_id.clone()),
                    Param::from(assignee.clone()),
                    Param::I64(ts),
                    Param::I64(ts),
                    Param::Bool(true),
                ],
            )?;
        }
        EventPayload::BeadUpdated {
            bead_id,
            title,
            description,
            priority,
            assignee,
        } => {
            tx.query(
                "UPDATE beads SET
                   title = COALESCE(?, title),
                   description = COALESCE(?, description),
                   priority = COALESCE(?, priority),
                   assignee = COALESCE(?, assignee),
                   updated_at = ?, dirty = ?
                 WHERE id = ? AND project_key = ?",
                &[
                    Param::from(title.clone()),
                    Param::from(description.clone()),
                    Param::from(*priority),
                    Param::from(assignee.clone()),
                    Param::I64(ts),
                    Param::Bool(true),
                    Param::from(bead_id.as_str()),
                    Param::from(project),
                ],
            )?;
        }
        EventPayload::BeadStatusChanged { bead_id, to, .. } => {
            set_status(tx, project, bead_id, *to, ts, None)?;
            rebuild_dependents(tx, project, bead_id)?;
        }
        EventPayload::BeadClosed { bead_id, reason } => {
            set_status(tx, project, bead_id, BeadStatus::Closed, ts, reason.as_deref())?;
            rebuild_dependents(tx, project, bead_id)?;
        }
        EventPayload::BeadReopened { bead_id } => {
            set_status(tx, project, bead_id, BeadStatus::Open, ts, None)?;
            rebuild_dependents(tx, project, bead_id)?;
        }
        EventPayload::BeadDeleted {
            bead_id,
            deleted_by,
            reason,
        } => {
            tx.query(
                "UPDATE beads SET status = 'tombstone', deleted_at = ?, deleted_by = ?,
                        delete_reason = ?, updated_at = ?, dirty = ?
                 WHERE id = ? AND project_key = ?",
                &[
                    Param::I64(ts),
                    Param::from(deleted_by.clone()),
                    Param::from(reason.clone()),
                    Param::I64(ts),
                    Param::Bool(true),
                    Param::from(bead_id.as_str()),
                    Param::from(project),
                ],
            )?;
            rebuild_dependents(tx, project, bead_id)?;
        }
        EventPayload::BeadDependencyAdded {
            bead_id,
            depends_on_id,
            relationship,
        } => {
            tx.query(
                "INSERT INTO bead_dependencies
                   (project_key, bead_id, depends_on_id, relationship, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (bead_id, depends_on_id, relationship) DO NOTHING",
                &[
                    Param::from(project),
                    Param::from(bead_id.as_str()),
                    Param::from(depends_on_id.as_str()),
                    Param::from(relationship.as_str()),
                    Param::I64(ts),
                ],
            )?;
            touch_bead(tx, project, bead_id, ts)?;
            rebuild_blocked_cache(tx, project, bead_id)?;
        }
        EventPayload::BeadDependencyRemoved {
            bead_id,
            depends_on_id,
            relationship,
        } => {
            tx.query(
                "DELETE FROM bead_dependencies
                 WHERE bead_id = ? AND depends_on_id = ? AND relationship = ?",
                &[
                    Param::from(bead_id.as_str()),
                    Param::from(depends_on_id.as_str()),
                    Param::from(relationship.as_str()),
                ],
            )?;
            touch_bead(tx, project, bead_id, ts)?;
            rebuild_blocked_cache(tx, project, bead_id)?;
        }
        EventPayload::BeadLabelAdded { bead_id, label } => {
            tx.query(
                "INSERT INTO bead_labels (project_key, bead_id, label) VALUES (?, ?, ?)
                 ON CONFLICT (bead_id, label) DO NOTHING",
                &[
                    Param::from(project),
                    Param::from(bead_id.as_str()),
                    Param::from(label.as_str()),
                ],
            )?;
            touch_bead(tx, project, bead_id, ts)?;
        }
        EventPayload::BeadLabelRemoved { bead_id, label } => {
            tx.query(
                "DELETE FROM bead_labels WHERE bead_id = ? AND label = ?",
                &[Param::from(bead_id.as_str()), Param::from(label.as_str())],
            )?;
            touch_bead(tx, project, bead_id, ts)?;
        }
        EventPayload::BeadCommentAdded {
            comment_id,
            bead_id,
            author,
            body,
            parent_id,
        } => {
            tx.query(
                "INSERT INTO bead_comments
                   (id, project_key, bead_id, author, body, parent_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    Param::from(comment_id.as_str()),
                    Param::from(project),
                    Param::from(bead_id.as_str()),
                    Param::from(author.as_str()),
                    Param::from(body.as_str()),
                    Param::from(parent_id.clone()),
                    Param::I64(ts),
                    Param::I64(ts),
                ],
            )?;
            touch_bead(tx, project, bead_id, ts)?;
        }
        EventPayload::BeadCommentUpdated { comment_id, body } => {
            tx.query(
                "UPDATE bead_comments SET body = ?, updated_at = ? WHERE id = ?",
                &[
                    Param::from(body.as_str()),
                    Param::I64(ts),
                    Param::from(comment_id.as_str()),
                ],
            )?;
        }
        EventPayload::BeadCommentDeleted { comment_id } => {
            tx.query(
                "DELETE FROM bead_comments WHERE id = ?",
                &[Param::from(comment_id.as_str())],
            )?;
        }
        EventPayload::EpicChildAdded { epic_id, child_id } => {
            tx.query(
                "UPDATE beads SET parent_id = ?, updated_at = ?, dirty = ?
                 WHERE id = ? AND project_key = ?",
                &[
                    Param::from(epic_id.as_str()),
                    Param::I64(ts),
                    Param::Bool(true),
                    Param::from(child_id.as_str()),
                    Param::from(project),
                ],
            )?;
        }
        EventPayload::EpicChildRemoved { epic_id, child_id } => {
            tx.query(
                "UPDATE beads SET parent_id = NULL, updated_at = ?, dirty = ?
                 WHERE id = ? AND project_key = ? AND parent_id = ?",
                &[
                    Param::I64(ts),
                    Param::Bool(true),
                    Param::from(child_id.as_str()),
                    Param::from(project),
                    Param::from(epic_id.as_str()),
                ],
            )?;
        }
        EventPayload::MemoryStored {
            memory_id,
            content,
            tags,
            metadata,
            collection,
            confidence,
            embedding,
        } => {
            hive_memory_core::apply_stored(
                tx, memory_id, project, content, tags, metadata, collection, *confidence,
                embedding, ts,
            )?;
        }
        EventPayload::MemoryValidated { memory_id } => {
            hive_memory_core::apply_validated(tx, memory_id, ts)?;
        }
        EventPayload::MemoryRemoved { memory_id } => {
            hive_memory_core::apply_removed(tx, memory_id)?;
        }
        // Journal-only kinds: visible to streams, no materialized view.
        EventPayload::OutcomeRecorded { .. } | EventPayload::CheckpointCreated { .. } => {}
    }

    if let Some(actor) = event.payload.actor() {
        tx.query(
            "UPDATE agents SET last_active_at = ? WHERE project_key = ? AND name = ?",
            &[Param::I64(ts), Param::from(project), Param::from(actor)],
        )?;
    }

    Ok(())
}

fn set_status(
    tx: &mut Tx<'_>,
    project: &str,
    bead_id: &str,
    to: BeadStatus,
    ts: i64,
    closed_reason: Option<&str>,
) -> Result<()> {
    let (closed_at, reason) = if to == BeadStatus::Closed {
        (Some(ts), closed_reason.map(|s| s.to_string()))
    } else {
        // Leaving `closed` clears the closure marker.
        (None, None)
    };
    let n = tx.query(
        "UPDATE beads SET status = ?, closed_at = ?, closed_reason = ?, updated_at = ?, dirty = ?
         WHERE id = ? AND project_key = ?
         RETURNING id",
        &[
            Param::from(to.as_str()),
            Param::from(closed_at),
            Param::from(reason),
            Param::I64(ts),
            Param::Bool(true),
            Param::from(bead_id),
            Param::from(project),
        ],
    )?;
    if n.is_empty() {
        return Err(StoreError::NotFound(format!("bead `{bead_id}`")));
    }
    Ok(())
}

fn touch_bead(tx: &mut Tx<'_>, project: &str, bead_id: &str, ts: i64) -> Result<()> {
    tx.query(
        "UPDATE beads SET updated_at = ?, dirty = ? WHERE id = ? AND project_key = ?",
        &[
            Param::I64(ts),
            Param::Bool(true),
            Param::from(bead_id),
            Param::from(project),
        ],
    )?;
    Ok(())
}

/// Recompute the blocked cache for one bead from its current `blocks`
/// dependencies.
pub(crate) fn rebuild_blocked_cache(tx: &mut Tx<'_>, project: &str, bead_id: &str) -> Result<()> {
    tx.query(
        "DELETE FROM blocked_beads WHERE bead_id = ?",
        &[Param::from(bead_id)],
    )?;
    tx.query(
        "INSERT INTO blocked_beads (project_key, bead_id, blocker_id)
         SELECT d.project_key, d.bead_id, d.depends_on_id
         FROM bead_dependencies d
         JOIN beads b ON b.id = d.depends_on_id
         WHERE d.project_key = ? AND d.bead_id = ? AND d.relationship = 'blocks'
           AND b.status IN ('open', 'in_progress', 'blocked')
           AND b.deleted_at IS NULL",
        &[Param::from(project), Param::from(bead_id)],
    )?;
    Ok(())
}

/// A status change on `blocker_id` can unblock (or re-block) every bead that
/// depends on it.
fn rebuild_dependents(tx: &mut Tx<'_>, project: &str, blocker_id: &str) -> Result<()> {
    let dependents = tx.query(
        "SELECT DISTINCT bead_id FROM bead_dependencies
         WHERE depends_on_id = ? AND relationship = 'blocks'",
        &[Param::from(blocker_id)],
    )?;
    for row in &dependents {
        let dependent = row.get_str("bead_id")?.to_string();
        rebuild_blocked_cache(tx, project, &dependent)?;
    }
    Ok(())
}
