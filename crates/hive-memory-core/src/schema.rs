//! Per-dialect DDL for the memory tables.
//!
//! SQLite gets a vec0 virtual table (cosine metric) plus an FTS5 shadow kept
//! in sync by triggers; Postgres keeps the embedding inline as a
//! `vector(1024)` column with an HNSW index and a GIN tsvector index.

use hive_store::{Dialect, Migration, Result, Tx};

use crate::EMBEDDING_DIM;

/// Memory-domain migrations. Versions live in the shared kernel version
/// space; the kernel appends these after its own.
pub fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 60,
        description: "memory tables, vector index, fts shadow",
        up: create_memory_tables,
    }]
}

fn create_memory_tables(tx: &mut Tx<'_>, dialect: Dialect) -> Result<()> {
    match dialect {
        Dialect::Sqlite => {
            tx.exec(
                "CREATE TABLE IF NOT EXISTS memories (
                   id TEXT PRIMARY KEY,
                   project_key TEXT NOT NULL,
                   content TEXT NOT NULL,
                   tags TEXT NOT NULL DEFAULT '',
                   metadata TEXT NOT NULL DEFAULT '{}',
                   collection TEXT NOT NULL DEFAULT 'default',
                   confidence REAL NOT NULL DEFAULT 0.7
                     CHECK (confidence >= 0.0 AND confidence <= 1.0),
                   created_at BIGINT NOT NULL,
                   validated_at BIGINT
                 );
                 CREATE INDEX IF NOT EXISTS idx_memories_project
                   ON memories(project_key);
                 CREATE INDEX IF NOT EXISTS idx_memories_collection
                   ON memories(project_key, collection);",
            )?;
            tx.exec(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS memory_vectors USING vec0(
                   id TEXT PRIMARY KEY,
                   embedding FLOAT[{EMBEDDING_DIM}] distance_metric=cosine
                 );"
            ))?;
            tx.exec(
                "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                   id UNINDEXED,
                   content,
                   tags
                 );
                 CREATE TRIGGER IF NOT EXISTS memories_fts_insert
                 AFTER INSERT ON memories BEGIN
                   INSERT INTO memories_fts (id, content, tags)
                   VALUES (new.id, new.content, new.tags);
                 END;
                 CREATE TRIGGER IF NOT EXISTS memories_fts_delete
                 AFTER DELETE ON memories BEGIN
                   DELETE FROM memories_fts WHERE id = old.id;
                 END;
                 CREATE TRIGGER IF NOT EXISTS memories_fts_update
                 AFTER UPDATE OF content, tags ON memories BEGIN
                   DELETE FROM memories_fts WHERE id = old.id;
                   INSERT INTO memories_fts (id, content, tags)
                   VALUES (new.id, new.content, new.tags);
                 END;",
            )?;
        }
        Dialect::Postgres => {
            tx.exec("CREATE EXTENSION IF NOT EXISTS vector")?;
            tx.exec(&format!(
                "CREATE TABLE IF NOT EXISTS memories (
                   id TEXT PRIMARY KEY,
                   project_key TEXT NOT NULL,
                   content TEXT NOT NULL,
                   tags TEXT NOT NULL DEFAULT '',
                   metadata JSONB NOT NULL DEFAULT '{{}}',
                   collection TEXT NOT NULL DEFAULT 'default',
                   confidence DOUBLE PRECISION NOT NULL DEFAULT 0.7
                     CHECK (confidence >= 0.0 AND confidence <= 1.0),
                   created_at BIGINT NOT NULL,
                   validated_at BIGINT,
                   embedding vector({EMBEDDING_DIM})
                 );
                 CREATE INDEX IF NOT EXISTS idx_memories_project
                   ON memories(project_key);
                 CREATE INDEX IF NOT EXISTS idx_memories_collection
                   ON memories(project_key, collection);
                 CREATE INDEX IF NOT EXISTS idx_memories_embedding
                   ON memories USING hnsw (embedding vector_cosine_ops);
                 CREATE INDEX IF NOT EXISTS idx_memories_fts
                   ON memories USING gin (to_tsvector('english', content));"
            ))?;
        }
    }
    Ok(())
}
