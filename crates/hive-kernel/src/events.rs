//! The event model: a closed, tagged union of everything the kernel
//! journals, plus the append/read surface of the store.
//!
//! `sequence` is assigned by the database (auto-increment primary key) and
//! is strictly increasing in commit order; projections for an event are
//! written in the same transaction as its insert, so no reader ever observes
//! a sequence without its projection effects.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use hive_store::{Param, Result, Row, StoreError, Tx};

use crate::projections;

/// Message importance, highest first in inbox ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

/// Work item categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Epic,
    #[default]
    Task,
    Bug,
    Feature,
    Chore,
    Message,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Chore => "chore",
            Self::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "epic" => Ok(Self::Epic),
            "task" => Ok(Self::Task),
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "chore" => Ok(Self::Chore),
            "message" => Ok(Self::Message),
            other => Err(StoreError::Invalid(format!("unknown issue type `{other}`"))),
        }
    }
}

/// Bead lifecycle states. `tombstone` is reached only through deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
    Tombstone,
}

impl BeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            "tombstone" => Ok(Self::Tombstone),
            other => Err(StoreError::Invalid(format!("unknown status `{other}`"))),
        }
    }
}

/// Typed dependency relationships. Only `blocks` feeds the blocked cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    Blocks,
    Related,
    ParentChild,
    DiscoveredFrom,
    RepliesTo,
    Duplicates,
    Supersedes,
    RelatesTo,
}

impl Relationship {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Related => "related",
            Self::ParentChild => "parent-child",
            Self::DiscoveredFrom => "discovered-from",
            Self::RepliesTo => "replies-to",
            Self::Duplicates => "duplicates",
            Self::Supersedes => "supersedes",
            Self::RelatesTo => "relates-to",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blocks" => Ok(Self::Blocks),
            "related" => Ok(Self::Related),
            "parent-child" => Ok(Self::ParentChild),
            "discovered-from" => Ok(Self::DiscoveredFrom),
            "replies-to" => Ok(Self::RepliesTo),
            "duplicates" => Ok(Self::Duplicates),
            "supersedes" => Ok(Self::Supersedes),
            "relates-to" => Ok(Self::RelatesTo),
            other => Err(StoreError::Invalid(format!(
                "unknown relationship `{other}`"
            ))),
        }
    }
}

/// Everything the kernel journals, discriminated by the `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    AgentRegistered {
        name: String,
        #[serde(default)]
        program: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        task_description: Option<String>,
    },
    MessageSent {
        message_id: String,
        from_agent: String,
        to_agents: Vec<String>,
        subject: String,
        body: String,
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        importance: Importance,
        #[serde(default)]
        metadata: JsonValue,
    },
    MessageRead {
        message_id: String,
        agent: String,
    },
    MessageAcked {
        message_id: String,
        agent: String,
    },
    FileReserved {
        reservation_ids: Vec<String>,
        agent: String,
        path_patterns: Vec<String>,
        exclusive: bool,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        ttl_seconds: Option<i64>,
    },
    FileReleased {
        agent: String,
        #[serde(default)]
        path_patterns: Option<Vec<String>>,
    },
    BeadCreated {
        bead_id: String,
        title: String,
        #[serde(default)]
        description: Option<String>,
        issue_type: IssueType,
        priority: i64,
        #[serde(default)]
        parent_id: Option<String>,
        #[serde(default)]
        assignee: Option<String>,
    },
    BeadUpdated {
        bead_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        assignee: Option<String>,
    },
    BeadStatusChanged {
        bead_id: String,
        #[serde(default)]
        from: Option<BeadStatus>,
        to: BeadStatus,
    },
    BeadClosed {
        bead_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    BeadReopened {
        bead_id: String,
    },
    BeadDeleted {
        bead_id: String,
        #[serde(default)]
        deleted_by: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    BeadDependencyAdded {
        bead_id: String,
        depends_on_id: String,
        relationship: Relationship,
    },
    BeadDependencyRemoved {
        bead_id: String,
        depends_on_id: String,
        relationship: Relationship,
    },
    BeadLabelAdded {
        bead_id: String,
        label: String,
    },
    BeadLabelRemoved {
        bead_id: String,
        label: String,
    },
    BeadCommentAdded {
        comment_id: String,
        bead_id: String,
        author: String,
        body: String,
        #[serde(default)]
        parent_id: Option<String>,
    },
    BeadCommentUpdated {
        comment_id: String,
        body: String,
    },
    BeadCommentDeleted {
        comment_id: String,
    },
    EpicChildAdded {
        epic_id: String,
        child_id: String,
    },
    EpicChildRemoved {
        epic_id: String,
        child_id: String,
    },
    MemoryStored {
        memory_id: String,
        content: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        metadata: JsonValue,
        collection: String,
        confidence: f64,
        embedding: Vec<f32>,
    },
    MemoryValidated {
        memory_id: String,
    },
    MemoryRemoved {
        memory_id: String,
    },
    OutcomeRecorded {
        agent: String,
        #[serde(default)]
        bead_id: Option<String>,
        success: bool,
        #[serde(default)]
        details: JsonValue,
    },
    CheckpointCreated {
        name: String,
        #[serde(default)]
        data: JsonValue,
    },
}

impl EventPayload {
    /// Wire tag, matching the `type` field of the serialized form.
    pub fn kind(&self) -> &'static str {
        use hive_topics as t;
        match self {
            Self::AgentRegistered { .. } => t::KIND_AGENT_REGISTERED,
            Self::MessageSent { .. } => t::KIND_MESSAGE_SENT,
            Self::MessageRead { .. } => t::KIND_MESSAGE_READ,
            Self::MessageAcked { .. } => t::KIND_MESSAGE_ACKED,
            Self::FileReserved { .. } => t::KIND_FILE_RESERVED,
            Self::FileReleased { .. } => t::KIND_FILE_RELEASED,
            Self::BeadCreated { .. } => t::KIND_BEAD_CREATED,
            Self::BeadUpdated { .. } => t::KIND_BEAD_UPDATED,
            Self::BeadStatusChanged { .. } => t::KIND_BEAD_STATUS_CHANGED,
            Self::BeadClosed { .. } => t::KIND_BEAD_CLOSED,
            Self::BeadReopened { .. } => t::KIND_BEAD_REOPENED,
            Self::BeadDeleted { .. } => t::KIND_BEAD_DELETED,
            Self::BeadDependencyAdded { .. } => t::KIND_BEAD_DEPENDENCY_ADDED,
            Self::BeadDependencyRemoved { .. } => t::KIND_BEAD_DEPENDENCY_REMOVED,
            Self::BeadLabelAdded { .. } => t::KIND_BEAD_LABEL_ADDED,
            Self::BeadLabelRemoved { .. } => t::KIND_BEAD_LABEL_REMOVED,
            Self::BeadCommentAdded { .. } => t::KIND_BEAD_COMMENT_ADDED,
            Self::BeadCommentUpdated { .. } => t::KIND_BEAD_COMMENT_UPDATED,
            Self::BeadCommentDeleted { .. } => t::KIND_BEAD_COMMENT_DELETED,
            Self::EpicChildAdded { .. } => t::KIND_EPIC_CHILD_ADDED,
            Self::EpicChildRemoved { .. } => t::KIND_EPIC_CHILD_REMOVED,
            Self::MemoryStored { .. } => t::KIND_MEMORY_STORED,
            Self::MemoryValidated { .. } => t::KIND_MEMORY_VALIDATED,
            Self::MemoryRemoved { .. } => t::KIND_MEMORY_REMOVED,
            Self::OutcomeRecorded { .. } => t::KIND_OUTCOME_RECORDED,
            Self::CheckpointCreated { .. } => t::KIND_CHECKPOINT_CREATED,
        }
    }

    /// Which agent (if any) this event names, for `last_active_at` touches.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::AgentRegistered { name, .. } => Some(name),
            Self::MessageSent { from_agent, .. } => Some(from_agent),
            Self::MessageRead { agent, .. }
            | Self::MessageAcked { agent, .. }
            | Self::FileReserved { agent, .. }
            | Self::FileReleased { agent, .. }
            | Self::OutcomeRecorded { agent, .. } => Some(agent),
            Self::BeadCommentAdded { author, .. } => Some(author),
            _ => None,
        }
    }
}

/// An immutable journaled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub sequence: i64,
    pub project_key: String,
    pub timestamp_ms: i64,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Filter for [`crate::Kernel::read_events`]. `after_sequence` is strict
/// (`sequence > after_sequence`) and is the primary resumption tool.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub project_key: Option<String>,
    pub kinds: Vec<String>,
    pub after_sequence: Option<i64>,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub(crate) fn map_event_row(row: &Row) -> Result<Event> {
    let sequence = row.get_i64("sequence")?;
    let payload: EventPayload = serde_json::from_value(row.get_json("payload")?)
        .map_err(|e| StoreError::Corruption(format!("event {sequence} payload: {e}")))?;
    Ok(Event {
        id: sequence,
        sequence,
        project_key: row.get_str("project_key")?.to_string(),
        timestamp_ms: row.get_i64("timestamp_ms")?,
        payload,
    })
}

/// Insert an event and apply its projection inside the caller's transaction.
pub(crate) fn append_in_tx(
    tx: &mut Tx<'_>,
    project_key: &str,
    payload: EventPayload,
    timestamp_ms: i64,
) -> Result<Event> {
    let payload_json = serde_json::to_value(&payload)
        .map_err(|e| StoreError::Invalid(format!("unserializable payload: {e}")))?;
    let rows = tx.query(
        "INSERT INTO events (kind, project_key, timestamp_ms, payload)
         VALUES (?, ?, ?, ?) RETURNING sequence",
        &[
            Param::from(payload.kind()),
            Param::from(project_key),
            Param::I64(timestamp_ms),
            Param::Json(payload_json),
        ],
    )?;
    let sequence = rows
        .first()
        .ok_or_else(|| StoreError::Corruption("insert returned no sequence".into()))?
        .get_i64("sequence")?;
    let event = Event {
        id: sequence,
        sequence,
        project_key: project_key.to_string(),
        timestamp_ms,
        payload,
    };
    projections::apply(&event, tx)?;
    Ok(event)
}

/// Read events matching `filter` in ascending sequence order, within an open
/// transaction.
pub(crate) fn read_in_tx(tx: &mut Tx<'_>, filter: &EventFilter) -> Result<Vec<Event>> {
    let (sql, params) = build_read_query(filter);
    let rows = tx.query(&sql, &params)?;
    rows.iter().map(map_event_row).collect()
}

pub(crate) fn build_read_query(filter: &EventFilter) -> (String, Vec<Param>) {
    let mut sql =
        String::from("SELECT sequence, kind, project_key, timestamp_ms, payload FROM events");
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Param> = Vec::new();

    if let Some(project) = &filter.project_key {
        clauses.push("project_key = ?".into());
        params.push(Param::from(project.clone()));
    }
    if !filter.kinds.is_empty() {
        let placeholders = vec!["?"; filter.kinds.len()].join(", ");
        clauses.push(format!("kind IN ({placeholders})"));
        params.extend(filter.kinds.iter().map(|k| Param::from(k.clone())));
    }
    if let Some(after) = filter.after_sequence {
        clauses.push("sequence > ?".into());
        params.push(Param::I64(after));
    }
    if let Some(from) = filter.from_timestamp {
        clauses.push("timestamp_ms >= ?".into());
        params.push(Param::I64(from));
    }
    if let Some(to) = filter.to_timestamp {
        clauses.push("timestamp_ms <= ?".into());
        params.push(Param::I64(to));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY sequence ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params.push(Param::I64(limit));
    }
    if let Some(offset) = filter.offset {
        if filter.limit.is_none() {
            // SQLite requires a LIMIT before OFFSET; bind one both dialects
            // accept.
            sql.push_str(" LIMIT ?");
            params.push(Param::I64(i64::MAX));
        }
        sql.push_str(" OFFSET ?");
        params.push(Param::I64(offset));
    }
    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tags_match_topics() {
        let payload = EventPayload::BeadCreated {
            bead_id: "bd-1".into(),
            title: "t".into(),
            description: None,
            issue_type: IssueType::Task,
            priority: 2,
            parent_id: None,
            assignee: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], payload.kind());
    }

    #[test]
    fn relationship_uses_kebab_case_on_the_wire() {
        let json = serde_json::to_value(Relationship::DiscoveredFrom).unwrap();
        assert_eq!(json, "discovered-from");
        assert_eq!(Relationship::parse("discovered-from").unwrap(), Relationship::DiscoveredFrom);
    }

    #[test]
    fn importance_orders_urgent_first() {
        assert!(Importance::Urgent.rank() > Importance::High.rank());
        assert!(Importance::High.rank() > Importance::Normal.rank());
        assert!(Importance::Normal.rank() > Importance::Low.rank());
    }

    #[test]
    fn read_query_composes_filters() {
        let filter = EventFilter {
            project_key: Some("p".into()),
            kinds: vec!["bead_created".into(), "bead_closed".into()],
            after_sequence: Some(5),
            limit: Some(10),
            ..Default::default()
        };
        let (sql, params) = build_read_query(&filter);
        assert!(sql.contains("project_key = ?"));
        assert!(sql.contains("kind IN (?, ?)"));
        assert!(sql.contains("sequence > ?"));
        assert!(sql.ends_with("LIMIT ?"));
        assert_eq!(params.len(), 5);
    }
}
