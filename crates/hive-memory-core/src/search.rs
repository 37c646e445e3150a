//! Hybrid retrieval: vector KNN with decay-adjusted ranking, plus an FTS
//! path used as an explicit mode or as the fallback when the embedder is
//! unreachable.

use std::collections::HashMap;

use hive_store::{Db, Dialect, Param, Result};

use crate::{decay_factor, map_memory_row, MatchType, Memory, MemoryHit, MEMORY_COLUMNS};

/// Vector search: `score = 1 - cosine_distance`, filtered by `threshold`,
/// decay applied to the ranking only.
pub fn find_vector(
    db: &Db,
    project_key: &str,
    embedding: &[f32],
    collection: Option<&str>,
    threshold: f64,
    limit: i64,
    now_ms: i64,
) -> Result<Vec<MemoryHit>> {
    // Over-fetch before the project/collection filter trims candidates.
    let candidate_limit = (limit.max(1)) * 4;
    let scored: Vec<(String, f64)> = match db.dialect() {
        Dialect::Sqlite => {
            let rows = db.query(
                "SELECT id, distance FROM memory_vectors
                 WHERE embedding MATCH ? AND k = ?
                 ORDER BY distance",
                &[
                    Param::Vector(embedding.to_vec()),
                    Param::I64(candidate_limit),
                ],
            )?;
            rows.iter()
                .map(|r| Ok((r.get_str("id")?.to_string(), r.get_f64("distance")?)))
                .collect::<Result<_>>()?
        }
        Dialect::Postgres => {
            let rows = db.query(
                "SELECT id, (embedding <=> ?::vector) AS distance FROM memories
                 WHERE project_key = ? AND embedding IS NOT NULL
                 ORDER BY distance LIMIT ?",
                &[
                    Param::Vector(embedding.to_vec()),
                    Param::from(project_key),
                    Param::I64(candidate_limit),
                ],
            )?;
            rows.iter()
                .map(|r| Ok((r.get_str("id")?.to_string(), r.get_f64("distance")?)))
                .collect::<Result<_>>()?
        }
    };

    let ids: Vec<&str> = scored.iter().map(|(id, _)| id.as_str()).collect();
    let memories = fetch_memories(db, &ids)?;

    let mut hits = Vec::new();
    for (id, distance) in &scored {
        let Some(memory) = memories.get(id.as_str()) else {
            continue;
        };
        if memory.project_key != project_key {
            continue;
        }
        if let Some(coll) = collection {
            if memory.collection != coll {
                continue;
            }
        }
        let score = 1.0 - distance;
        if score < threshold {
            continue;
        }
        hits.push((
            score * decay_factor(
                memory.confidence,
                memory.validated_at.unwrap_or(memory.created_at),
                now_ms,
            ),
            MemoryHit {
                memory: memory.clone(),
                score,
                match_type: MatchType::Vector,
            },
        ));
    }
    hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits
        .into_iter()
        .take(limit.max(0) as usize)
        .map(|(_, h)| h)
        .collect())
}

/// Full-text search, rank normalized to a positive descending score.
pub fn find_fts(
    db: &Db,
    project_key: &str,
    query: &str,
    collection: Option<&str>,
    limit: i64,
    now_ms: i64,
) -> Result<Vec<MemoryHit>> {
    let candidate_limit = (limit.max(1)) * 4;
    let scored: Vec<(String, f64)> = match db.dialect() {
        Dialect::Sqlite => {
            let escaped = escape_fts_query(query);
            if escaped.is_empty() {
                return Ok(Vec::new());
            }
            // FTS5 rank is negative (more negative = better); negate it.
            let rows = db.query(
                "SELECT id, -rank AS score FROM memories_fts
                 WHERE memories_fts MATCH ? ORDER BY rank LIMIT ?",
                &[Param::Text(escaped), Param::I64(candidate_limit)],
            )?;
            rows.iter()
                .map(|r| Ok((r.get_str("id")?.to_string(), r.get_f64("score")?)))
                .collect::<Result<_>>()?
        }
        Dialect::Postgres => {
            let rows = db.query(
                "SELECT id,
                        ts_rank(to_tsvector('english', content),
                                plainto_tsquery('english', ?)) AS score
                 FROM memories
                 WHERE project_key = ?
                   AND to_tsvector('english', content) @@ plainto_tsquery('english', ?)
                 ORDER BY score DESC LIMIT ?",
                &[
                    Param::from(query),
                    Param::from(project_key),
                    Param::from(query),
                    Param::I64(candidate_limit),
                ],
            )?;
            rows.iter()
                .map(|r| Ok((r.get_str("id")?.to_string(), r.get_f64("score")?)))
                .collect::<Result<_>>()?
        }
    };

    let ids: Vec<&str> = scored.iter().map(|(id, _)| id.as_str()).collect();
    let memories = fetch_memories(db, &ids)?;

    let mut hits = Vec::new();
    for (id, score) in &scored {
        let Some(memory) = memories.get(id.as_str()) else {
            continue;
        };
        if memory.project_key != project_key {
            continue;
        }
        if let Some(coll) = collection {
            if memory.collection != coll {
                continue;
            }
        }
        hits.push((
            score * decay_factor(
                memory.confidence,
                memory.validated_at.unwrap_or(memory.created_at),
                now_ms,
            ),
            MemoryHit {
                memory: memory.clone(),
                score: *score,
                match_type: MatchType::Fts,
            },
        ));
    }
    hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits
        .into_iter()
        .take(limit.max(0) as usize)
        .map(|(_, h)| h)
        .collect())
}

/// Batch-fetch memory rows by id.
fn fetch_memories(db: &Db, ids: &[&str]) -> Result<HashMap<String, Memory>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id IN ({placeholders})");
    let params: Vec<Param> = ids.iter().map(|id| Param::from(*id)).collect();
    let rows = db.query(&sql, &params)?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        let memory = map_memory_row(row)?;
        map.insert(memory.id.clone(), memory);
    }
    Ok(map)
}

/// Escape a user query for FTS5 MATCH: quote each token so punctuation never
/// reads as syntax.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate content to a byte budget on a char boundary, appending an
/// ellipsis when cut.
pub fn truncate_preview(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let end = content
        .char_indices()
        .take_while(|(i, _)| *i < max_bytes)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(max_bytes);
    format!("{}...", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_each_token() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts_query("a\"b"), "\"ab\"");
        assert_eq!(escape_fts_query("  "), "");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(truncate_preview("short", 80), "short");
        let cut = truncate_preview(&"é".repeat(50), 7);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 11);
    }
}
