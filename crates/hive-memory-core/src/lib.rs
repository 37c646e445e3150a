//! Core storage primitives backing the hive memory overlay: per-dialect
//! schema, projection writes, hybrid retrieval, and ranking utilities.
//!
//! The kernel owns the event journal and calls into this crate from its
//! projection registry; the search functions here read the materialized
//! tables directly.

mod embedder;
mod legacy;
mod schema;
mod search;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use hive_store::{Dialect, Param, Result, Row, StoreError, Tx};

pub use embedder::{check_dimensions, Embedder, EmbedderHealth, EMBEDDING_DIM};
pub use legacy::{maybe_import_legacy, reset_migration_check};
pub use schema::migrations;
pub use search::{find_fts, find_vector, truncate_preview};

/// A stored memory row, embedding excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub project_key: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: JsonValue,
    pub collection: String,
    pub confidence: f64,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<i64>,
}

/// How a search hit was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Vector,
    Fts,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub memory: Memory,
    pub score: f64,
    pub match_type: MatchType,
}

/// Aggregate counts for `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: i64,
    pub collections: Vec<(String, i64)>,
    pub average_confidence: f64,
}

/// Half-life in days for a confidence value: 45 days at 0.0, 135 at 1.0.
pub fn half_life_days(confidence: f64) -> f64 {
    45.0 + confidence.clamp(0.0, 1.0) * 90.0
}

/// Ranking-time decay multiplier. Never mutates stored rows; a validation
/// resets the reference timestamp instead.
pub fn decay_factor(confidence: f64, reference_ms: i64, now_ms: i64) -> f64 {
    let age_days = ((now_ms - reference_ms).max(0) as f64) / 86_400_000.0;
    (-(age_days / half_life_days(confidence))).exp2()
}

pub(crate) fn map_memory_row(row: &Row) -> Result<Memory> {
    let tags = match row.opt_str("tags")? {
        Some(s) if !s.is_empty() => s.split(',').map(|t| t.to_string()).collect(),
        _ => Vec::new(),
    };
    Ok(Memory {
        id: row.get_str("id")?.to_string(),
        project_key: row.get_str("project_key")?.to_string(),
        content: row.get_str("content")?.to_string(),
        tags,
        metadata: row.get_json("metadata")?,
        collection: row.get_str("collection")?.to_string(),
        confidence: row.get_f64("confidence")?,
        created_at: row.get_i64("created_at")?,
        validated_at: row.opt_i64("validated_at")?,
    })
}

const MEMORY_COLUMNS: &str =
    "id, project_key, content, tags, metadata, collection, confidence, created_at, validated_at";

/// Insert a memory plus its embedding. Called from the projection registry
/// inside the append transaction, and from replay.
#[allow(clippy::too_many_arguments)]
pub fn apply_stored(
    tx: &mut Tx<'_>,
    id: &str,
    project_key: &str,
    content: &str,
    tags: &[String],
    metadata: &JsonValue,
    collection: &str,
    confidence: f64,
    embedding: &[f32],
    timestamp_ms: i64,
) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(StoreError::Invalid(format!(
            "embedding has {} dimensions, expected {EMBEDDING_DIM}",
            embedding.len()
        )));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(StoreError::Invalid(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }
    let tags_joined = tags.join(",");
    match tx.dialect() {
        Dialect::Sqlite => {
            // Delete-then-insert keeps the FTS triggers in sync; REPLACE
            // would skip the delete trigger.
            tx.query("DELETE FROM memories WHERE id = ?", &[Param::from(id)])?;
            tx.query(
                "INSERT INTO memories
                   (id, project_key, content, tags, metadata, collection, confidence, created_at, validated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)",
                &[
                    Param::from(id),
                    Param::from(project_key),
                    Param::from(content),
                    Param::Text(tags_joined),
                    Param::Json(metadata.clone()),
                    Param::from(collection),
                    Param::F64(confidence),
                    Param::I64(timestamp_ms),
                ],
            )?;
            tx.query(
                "DELETE FROM memory_vectors WHERE id = ?",
                &[Param::from(id)],
            )?;
            tx.query(
                "INSERT INTO memory_vectors (id, embedding) VALUES (?, ?)",
                &[Param::from(id), Param::Vector(embedding.to_vec())],
            )?;
        }
        Dialect::Postgres => {
            tx.query(
                "INSERT INTO memories
                   (id, project_key, content, tags, metadata, collection, confidence, created_at, validated_at, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?::vector)
                 ON CONFLICT (id) DO UPDATE SET
                   content = EXCLUDED.content, tags = EXCLUDED.tags,
                   metadata = EXCLUDED.metadata, collection = EXCLUDED.collection,
                   confidence = EXCLUDED.confidence, embedding = EXCLUDED.embedding",
                &[
                    Param::from(id),
                    Param::from(project_key),
                    Param::from(content),
                    Param::Text(tags_joined),
                    Param::Json(metadata.clone()),
                    Param::from(collection),
                    Param::F64(confidence),
                    Param::I64(timestamp_ms),
                    Param::Vector(embedding.to_vec()),
                ],
            )?;
        }
    }
    Ok(())
}

/// Delete a memory; cascades to the embedding and the FTS shadow.
pub fn apply_removed(tx: &mut Tx<'_>, id: &str) -> Result<()> {
    if tx.dialect() == Dialect::Sqlite {
        tx.query(
            "DELETE FROM memory_vectors WHERE id = ?",
            &[Param::from(id)],
        )?;
    }
    // FTS5 shadow rows go through the delete trigger.
    tx.query("DELETE FROM memories WHERE id = ?", &[Param::from(id)])?;
    Ok(())
}

/// Reset the decay reference for a memory.
pub fn apply_validated(tx: &mut Tx<'_>, id: &str, timestamp_ms: i64) -> Result<()> {
    tx.query(
        "UPDATE memories SET validated_at = ? WHERE id = ?",
        &[Param::I64(timestamp_ms), Param::from(id)],
    )?;
    Ok(())
}

/// Truncate every memory projection table (replay support).
pub fn clear_all(tx: &mut Tx<'_>) -> Result<()> {
    if tx.dialect() == Dialect::Sqlite {
        tx.query("DELETE FROM memory_vectors", &[])?;
    }
    tx.query("DELETE FROM memories", &[])?;
    Ok(())
}

/// Fetch one memory by exact id.
pub fn get_memory(db: &hive_store::Db, id: &str) -> Result<Option<Memory>> {
    let rows = db.query(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ? LIMIT 1"),
        &[Param::from(id)],
    )?;
    rows.first().map(map_memory_row).transpose()
}

/// List memories for a project, optionally restricted to one collection.
pub fn list_memories(
    db: &hive_store::Db,
    project_key: &str,
    collection: Option<&str>,
    limit: i64,
) -> Result<Vec<Memory>> {
    let rows = if let Some(coll) = collection {
        db.query(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE project_key = ? AND collection = ?
                 ORDER BY created_at DESC LIMIT ?"
            ),
            &[Param::from(project_key), Param::from(coll), Param::I64(limit)],
        )?
    } else {
        db.query(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE project_key = ?
                 ORDER BY created_at DESC LIMIT ?"
            ),
            &[Param::from(project_key), Param::I64(limit)],
        )?
    };
    rows.iter().map(map_memory_row).collect()
}

/// Aggregate stats for a project's memories.
pub fn memory_stats(db: &hive_store::Db, project_key: &str) -> Result<MemoryStats> {
    let totals = db.query(
        "SELECT COUNT(*) AS n, COALESCE(AVG(confidence), 0.0) AS avg_conf
         FROM memories WHERE project_key = ?",
        &[Param::from(project_key)],
    )?;
    let (total, average_confidence) = match totals.first() {
        Some(row) => (row.get_i64("n")?, row.get_f64("avg_conf")?),
        None => (0, 0.0),
    };
    let rows = db.query(
        "SELECT collection, COUNT(*) AS n FROM memories
         WHERE project_key = ? GROUP BY collection ORDER BY collection",
        &[Param::from(project_key)],
    )?;
    let mut collections = Vec::with_capacity(rows.len());
    for row in &rows {
        collections.push((row.get_str("collection")?.to_string(), row.get_i64("n")?));
    }
    Ok(MemoryStats {
        total,
        collections,
        average_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_interpolates_linearly() {
        assert!((half_life_days(0.0) - 45.0).abs() < f64::EPSILON);
        assert!((half_life_days(1.0) - 135.0).abs() < f64::EPSILON);
        assert!((half_life_days(0.5) - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn decay_halves_at_one_half_life() {
        let day_ms = 86_400_000i64;
        let factor = decay_factor(0.0, 0, 45 * day_ms);
        assert!((factor - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decay_is_one_when_fresh() {
        assert!((decay_factor(0.7, 1_000, 1_000) - 1.0).abs() < f64::EPSILON);
    }
}
