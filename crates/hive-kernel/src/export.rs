//! JSONL export/import of beads for git synchronisation.
//!
//! One JSON object per line in `.hive/issues.jsonl`. Timestamps are emitted
//! as integer milliseconds; import coerces numeric strings too, since some
//! storage backends round-trip integers through text.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use hive_store::{Result, StoreError};

use crate::beads::BeadFilter;
use crate::events::{BeadStatus, EventPayload, IssueType};
use crate::Kernel;

/// The canonical line format. Integer timestamps are authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLine {
    pub id: String,
    pub title: String,
    pub status: BeadStatus,
    pub issue_type: IssueType,
    pub priority: i64,
    #[serde(deserialize_with = "de_ms")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_ms")]
    pub closed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MsRepr {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MsRepr {
    fn into_ms(self) -> std::result::Result<i64, String> {
        match self {
            Self::Int(v) => Ok(v),
            Self::Float(v) => Ok(v as i64),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(|v| v as i64)
                .map_err(|_| format!("unparseable timestamp `{s}`")),
        }
    }
}

fn de_ms<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    MsRepr::deserialize(deserializer)?
        .into_ms()
        .map_err(serde::de::Error::custom)
}

fn de_opt_ms<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    let repr: Option<MsRepr> = Option::deserialize(deserializer)?;
    repr.map(|r| r.into_ms().map_err(serde::de::Error::custom))
        .transpose()
}

/// Export the project's beads when any are dirty. Returns the number of
/// lines written (0 means the file was left untouched).
pub fn export_issues(kernel: &Kernel, project: &str, hive_dir: &Path) -> Result<usize> {
    let dirty = kernel.dirty_beads(project)?;
    if dirty.is_empty() {
        return Ok(0);
    }

    let beads = kernel.query_beads(project, &BeadFilter::default())?;
    let mut buffer = String::new();
    for bead in &beads {
        let line = IssueLine {
            id: bead.id.clone(),
            title: bead.title.clone(),
            status: bead.status,
            issue_type: bead.issue_type,
            priority: bead.priority,
            created_at: bead.created_at,
            description: bead.description.clone(),
            parent_id: bead.parent_id.clone(),
            closed_at: bead.closed_at,
            closed_reason: bead.closed_reason.clone(),
        };
        buffer.push_str(
            &serde_json::to_string(&line)
                .map_err(|e| StoreError::Invalid(format!("unserializable bead: {e}")))?,
        );
        buffer.push('\n');
    }

    fs::create_dir_all(hive_dir)
        .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", hive_dir.display())))?;
    let target = hive_dir.join("issues.jsonl");
    let tmp = hive_dir.join("issues.jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", tmp.display())))?;
        file.write_all(buffer.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", tmp.display())))?;
    }
    fs::rename(&tmp, &target)
        .map_err(|e| StoreError::Unavailable(format!("rename {}: {e}", target.display())))?;

    let dirty_ids: Vec<String> = dirty.into_iter().map(|b| b.id).collect();
    kernel.clear_dirty(project, &dirty_ids)?;
    tracing::debug!(lines = beads.len(), path = %target.display(), "exported issues");
    Ok(beads.len())
}

/// Import beads from a JSONL file, journaling creation (and closure) events
/// for ids the store has not seen. Existing ids are left alone. Returns how
/// many beads were imported.
pub fn import_issues(kernel: &Kernel, project: &str, path: &Path) -> Result<usize> {
    let raw = fs::read_to_string(path)
        .map_err(|e| StoreError::Unavailable(format!("read {}: {e}", path.display())))?;

    let mut imported = 0usize;
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let issue: IssueLine = serde_json::from_str(line).map_err(|e| {
            StoreError::Invalid(format!("{}:{}: malformed issue line: {e}", path.display(), idx + 1))
        })?;

        let exists = !kernel
            .db()
            .query(
                "SELECT id FROM beads WHERE project_key = ? AND id = ?",
                &[project.into(), issue.id.as_str().into()],
            )?
            .is_empty();
        if exists {
            continue;
        }

        let mut payloads = vec![EventPayload::BeadCreated {
            bead_id: issue.id.clone(),
            title: issue.title.clone(),
            description: issue.description.clone(),
            issue_type: issue.issue_type,
            priority: issue.priority,
            parent_id: issue.parent_id.clone(),
            assignee: None,
        }];
        match issue.status {
            BeadStatus::Open => {}
            BeadStatus::Closed => payloads.push(EventPayload::BeadClosed {
                bead_id: issue.id.clone(),
                reason: issue.closed_reason.clone(),
            }),
            other => payloads.push(EventPayload::BeadStatusChanged {
                bead_id: issue.id.clone(),
                from: Some(BeadStatus::Open),
                to: other,
            }),
        }
        kernel.append_events(project, payloads)?;
        imported += 1;
    }
    tracing::debug!(imported, path = %path.display(), "imported issues");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accept_integers_and_numeric_strings() {
        let from_int: IssueLine = serde_json::from_str(
            r#"{"id":"bd-1","title":"t","status":"open","issue_type":"task","priority":2,"created_at":1712000000000}"#,
        )
        .unwrap();
        assert_eq!(from_int.created_at, 1_712_000_000_000);

        let from_string: IssueLine = serde_json::from_str(
            r#"{"id":"bd-2","title":"t","status":"closed","issue_type":"bug","priority":1,"created_at":"1712000000000","closed_at":"1712000000500"}"#,
        )
        .unwrap();
        assert_eq!(from_string.created_at, 1_712_000_000_000);
        assert_eq!(from_string.closed_at, Some(1_712_000_000_500));
    }

    #[test]
    fn export_emits_integer_milliseconds() {
        let line = IssueLine {
            id: "bd-1".into(),
            title: "t".into(),
            status: BeadStatus::Open,
            issue_type: IssueType::Task,
            priority: 2,
            created_at: 1_712_000_000_000,
            description: None,
            parent_id: None,
            closed_at: None,
            closed_reason: None,
        };
        let json = serde_json::to_value(&line).unwrap();
        assert!(json["created_at"].is_i64());
        assert!(json.get("closed_at").is_none());
    }
}
