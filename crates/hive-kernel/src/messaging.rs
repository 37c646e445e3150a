//! Agent registration and directed messaging.
//!
//! Inbox ordering is importance first (`urgent > high > normal > low`),
//! then recency. Read and ack state is tracked per recipient; repeating
//! either is a no-op. Within one thread, messages are totally ordered by
//! journal sequence.

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hive_store::{Param, Result, Row, StoreError};

use crate::events::{append_in_tx, EventPayload, Importance};
use crate::Kernel;

/// Optional attributes captured at registration.
#[derive(Debug, Clone, Default)]
pub struct AgentSpec {
    pub program: Option<String>,
    pub model: Option<String>,
    pub task_description: Option<String>,
}

/// A projected agent row.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub project_key: String,
    pub name: String,
    pub program: Option<String>,
    pub model: Option<String>,
    pub task_description: Option<String>,
    pub registered_at: i64,
    pub last_active_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub importance: Importance,
    pub thread_id: Option<String>,
    pub metadata: JsonValue,
}

/// A full message as seen by one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub project_key: String,
    pub from_agent: String,
    pub to_agents: Vec<String>,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub sent_at: i64,
    pub sequence: i64,
    pub read_at: Option<i64>,
    pub acked_at: Option<i64>,
}

/// An inbox summary line; `body` is truncated to the preview budget.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub id: String,
    pub from_agent: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub sent_at: i64,
    pub sequence: i64,
    pub read_at: Option<i64>,
    pub acked_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct InboxOptions {
    pub limit: i64,
    pub offset: i64,
    pub unread_only: bool,
    pub thread_id: Option<String>,
    pub since_sequence: Option<i64>,
    /// Byte budget for body previews.
    pub preview_bytes: usize,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            unread_only: false,
            thread_id: None,
            since_sequence: None,
            preview_bytes: 240,
        }
    }
}

fn parse_importance(s: &str) -> Importance {
    match s {
        "low" => Importance::Low,
        "high" => Importance::High,
        "urgent" => Importance::Urgent,
        _ => Importance::Normal,
    }
}

impl Kernel {
    /// Register (or re-register) an agent in a project.
    pub fn register_agent(&self, project: &str, name: &str, spec: AgentSpec) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Self::invalid("agent name must not be empty"));
        }
        self.append_event(
            project,
            EventPayload::AgentRegistered {
                name: name.to_string(),
                program: spec.program,
                model: spec.model,
                task_description: spec.task_description,
            },
        )?;
        Ok(())
    }

    pub fn get_agent(&self, project: &str, name: &str) -> Result<Option<AgentRecord>> {
        let rows = self.db().query(
            "SELECT project_key, name, program, model, task_description, registered_at, last_active_at
             FROM agents WHERE project_key = ? AND name = ?",
            &[Param::from(project), Param::from(name)],
        )?;
        rows.first().map(map_agent_row).transpose()
    }

    pub fn list_agents(&self, project: &str) -> Result<Vec<AgentRecord>> {
        let rows = self.db().query(
            "SELECT project_key, name, program, model, task_description, registered_at, last_active_at
             FROM agents WHERE project_key = ? ORDER BY name",
            &[Param::from(project)],
        )?;
        rows.iter().map(map_agent_row).collect()
    }

    /// Send a directed message. Fails with `Invalid` on an empty recipient
    /// list.
    pub fn send_message(
        &self,
        project: &str,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        opts: SendOptions,
    ) -> Result<MessageRecord> {
        if to.is_empty() {
            return Err(Self::invalid("message needs at least one recipient"));
        }
        let message_id = Uuid::new_v4().to_string();
        let event = self.append_event(
            project,
            EventPayload::MessageSent {
                message_id: message_id.clone(),
                from_agent: from.to_string(),
                to_agents: to.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
                thread_id: opts.thread_id.clone(),
                importance: opts.importance,
                metadata: opts.metadata,
            },
        )?;
        Ok(MessageRecord {
            id: message_id,
            project_key: project.to_string(),
            from_agent: from.to_string(),
            to_agents: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
            thread_id: opts.thread_id,
            importance: opts.importance,
            sent_at: event.timestamp_ms,
            sequence: event.sequence,
            read_at: None,
            acked_at: None,
        })
    }

    /// Messages addressed to `agent`, importance first, then most recent.
    pub fn inbox(&self, project: &str, agent: &str, opts: &InboxOptions) -> Result<Vec<InboxEntry>> {
        let mut sql = String::from(
            "SELECT m.id, m.from_agent, m.subject, m.body, m.thread_id, m.importance,
                    m.sent_at, m.sequence, r.read_at, r.acked_at
             FROM messages m
             JOIN message_recipients r ON r.message_id = m.id
             WHERE m.project_key = ? AND r.agent_name = ?",
        );
        let mut params = vec![Param::from(project), Param::from(agent)];
        if opts.unread_only {
            sql.push_str(" AND r.read_at IS NULL");
        }
        if let Some(thread) = &opts.thread_id {
            sql.push_str(" AND m.thread_id = ?");
            params.push(Param::from(thread.clone()));
        }
        if let Some(since) = opts.since_sequence {
            sql.push_str(" AND m.sequence > ?");
            params.push(Param::I64(since));
        }
        sql.push_str(
            " ORDER BY CASE m.importance
                 WHEN 'urgent' THEN 3 WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0
               END DESC, m.sent_at DESC
              LIMIT ? OFFSET ?",
        );
        params.push(Param::I64(opts.limit));
        params.push(Param::I64(opts.offset));

        let rows = self.db().query(&sql, &params)?;
        rows.iter()
            .map(|row| {
                Ok(InboxEntry {
                    id: row.get_str("id")?.to_string(),
                    from_agent: row.get_str("from_agent")?.to_string(),
                    subject: row.get_str("subject")?.to_string(),
                    body: hive_memory_core::truncate_preview(
                        row.get_str("body")?,
                        opts.preview_bytes,
                    ),
                    thread_id: row.opt_str("thread_id")?.map(|s| s.to_string()),
                    importance: parse_importance(row.get_str("importance")?),
                    sent_at: row.get_i64("sent_at")?,
                    sequence: row.get_i64("sequence")?,
                    read_at: row.opt_i64("read_at")?,
                    acked_at: row.opt_i64("acked_at")?,
                })
            })
            .collect()
    }

    /// Fetch the full message for one recipient and mark it read.
    pub fn read_message(
        &self,
        project: &str,
        message_id: &str,
        agent: &str,
    ) -> Result<MessageRecord> {
        let record = self.mutate(|tx| {
            let rows = tx.query(
                "SELECT m.id, m.project_key, m.from_agent, m.subject, m.body, m.thread_id,
                        m.importance, m.sent_at, m.sequence, r.read_at, r.acked_at
                 FROM messages m
                 JOIN message_recipients r ON r.message_id = m.id
                 WHERE m.project_key = ? AND m.id = ? AND r.agent_name = ?",
                &[
                    Param::from(project),
                    Param::from(message_id),
                    Param::from(agent),
                ],
            )?;
            let row = rows.first().ok_or_else(|| {
                StoreError::NotFound(format!("message `{message_id}` for agent `{agent}`"))
            })?;
            let recipients = tx.query(
                "SELECT agent_name FROM message_recipients WHERE message_id = ? ORDER BY agent_name",
                &[Param::from(message_id)],
            )?;
            let to_agents = recipients
                .iter()
                .map(|r| Ok(r.get_str("agent_name")?.to_string()))
                .collect::<Result<Vec<_>>>()?;

            let mut record = MessageRecord {
                id: row.get_str("id")?.to_string(),
                project_key: row.get_str("project_key")?.to_string(),
                from_agent: row.get_str("from_agent")?.to_string(),
                to_agents,
                subject: row.get_str("subject")?.to_string(),
                body: row.get_str("body")?.to_string(),
                thread_id: row.opt_str("thread_id")?.map(|s| s.to_string()),
                importance: parse_importance(row.get_str("importance")?),
                sent_at: row.get_i64("sent_at")?,
                sequence: row.get_i64("sequence")?,
                read_at: row.opt_i64("read_at")?,
                acked_at: row.opt_i64("acked_at")?,
            };

            let event = append_in_tx(
                tx,
                project,
                EventPayload::MessageRead {
                    message_id: message_id.to_string(),
                    agent: agent.to_string(),
                },
                Kernel::now_ms(),
            )?;
            if record.read_at.is_none() {
                record.read_at = Some(event.timestamp_ms);
            }
            Ok((record, vec![event]))
        })?;
        Ok(record)
    }

    /// Acknowledge a message; repeat acks are no-ops.
    pub fn ack_message(&self, project: &str, message_id: &str, agent: &str) -> Result<()> {
        self.mutate(|tx| {
            let rows = tx.query(
                "SELECT message_id FROM message_recipients WHERE message_id = ? AND agent_name = ?",
                &[Param::from(message_id), Param::from(agent)],
            )?;
            if rows.is_empty() {
                return Err(StoreError::NotFound(format!(
                    "message `{message_id}` for agent `{agent}`"
                )));
            }
            let event = append_in_tx(
                tx,
                project,
                EventPayload::MessageAcked {
                    message_id: message_id.to_string(),
                    agent: agent.to_string(),
                },
                Kernel::now_ms(),
            )?;
            Ok(((), vec![event]))
        })
    }
}

fn map_agent_row(row: &Row) -> Result<AgentRecord> {
    Ok(AgentRecord {
        project_key: row.get_str("project_key")?.to_string(),
        name: row.get_str("name")?.to_string(),
        program: row.opt_str("program")?.map(|s| s.to_string()),
        model: row.opt_str("model")?.map(|s| s.to_string()),
        task_description: row.opt_str("task_description")?.map(|s| s.to_string()),
        registered_at: row.get_i64("registered_at")?,
        last_active_at: row.get_i64("last_active_at")?,
    })
}
