//! The memory overlay: event-sourced wrappers over the memory projection.
//!
//! Stored content and its embedding travel inside the `memory_stored`
//! event, so a replayed journal rebuilds the memory tables without
//! re-embedding anything.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use hive_memory_core::{
    check_dimensions, find_fts, find_vector, get_memory, list_memories, memory_stats,
    truncate_preview, Embedder, Memory, MemoryHit, MemoryStats,
};
use hive_store::{Result, StoreError};

use crate::events::EventPayload;
use crate::Kernel;

#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    pub tags: Vec<String>,
    pub metadata: JsonValue,
    pub collection: String,
    pub confidence: f64,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            metadata: JsonValue::Object(Default::default()),
            collection: "default".to_string(),
            confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryFindOptions {
    pub limit: i64,
    pub threshold: f64,
    pub collection: Option<String>,
    /// Return full content instead of bounded previews.
    pub expand: bool,
    /// Force the full-text path instead of vector search.
    pub fts: bool,
}

impl Default for MemoryFindOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.3,
            collection: None,
            expand: false,
            fts: false,
        }
    }
}

const PREVIEW_BYTES: usize = 240;

impl Kernel {
    /// Embed and store a memory; returns the new `mem_` id.
    pub fn memory_store(
        &self,
        project: &str,
        content: &str,
        opts: MemoryStoreOptions,
        embedder: &dyn Embedder,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(Self::invalid("memory content must not be empty"));
        }
        if !(0.0..=1.0).contains(&opts.confidence) {
            return Err(Self::invalid(format!(
                "confidence {} outside [0, 1]",
                opts.confidence
            )));
        }
        let embedding = embedder.embed(content)?;
        check_dimensions(&embedding)?;
        let memory_id = format!("mem_{}", &Uuid::new_v4().simple().to_string()[..12]);
        self.append_event(
            project,
            EventPayload::MemoryStored {
                memory_id: memory_id.clone(),
                content: content.to_string(),
                tags: opts.tags,
                metadata: opts.metadata,
                collection: opts.collection,
                confidence: opts.confidence,
                embedding,
            },
        )?;
        Ok(memory_id)
    }

    /// Search memories. Vector search by default; full-text when requested
    /// or when the embedder is unreachable.
    pub fn memory_find(
        &self,
        project: &str,
        query: &str,
        opts: &MemoryFindOptions,
        embedder: &dyn Embedder,
    ) -> Result<Vec<MemoryHit>> {
        let now = Self::now_ms();
        let collection = opts.collection.as_deref();
        let mut hits = if opts.fts {
            find_fts(self.db(), project, query, collection, opts.limit, now)?
        } else {
            match embedder.embed(query) {
                Ok(embedding) => find_vector(
                    self.db(),
                    project,
                    &embedding,
                    collection,
                    opts.threshold,
                    opts.limit,
                    now,
                )?,
                Err(StoreError::Unavailable(reason)) => {
                    tracing::warn!(%reason, "embedder unreachable, falling back to full-text search");
                    find_fts(self.db(), project, query, collection, opts.limit, now)?
                }
                Err(other) => return Err(other),
            }
        };
        if !opts.expand {
            for hit in &mut hits {
                hit.memory.content = truncate_preview(&hit.memory.content, PREVIEW_BYTES);
            }
        }
        Ok(hits)
    }

    pub fn memory_get(&self, id: &str) -> Result<Memory> {
        get_memory(self.db(), id)?
            .ok_or_else(|| StoreError::NotFound(format!("memory `{id}`")))
    }

    /// Remove a memory; cascades to its embedding and FTS shadow.
    pub fn memory_remove(&self, project: &str, id: &str) -> Result<()> {
        let memory = self.memory_get(id)?;
        self.append_event(
            project,
            EventPayload::MemoryRemoved {
                memory_id: memory.id,
            },
        )?;
        Ok(())
    }

    pub fn memory_list(
        &self,
        project: &str,
        collection: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Memory>> {
        list_memories(self.db(), project, collection, limit)
    }

    pub fn memory_stats(&self, project: &str) -> Result<MemoryStats> {
        memory_stats(self.db(), project)
    }

    /// Reset the decay timer on a memory; unknown ids fail with `NotFound`.
    pub fn memory_validate(&self, project: &str, id: &str) -> Result<()> {
        let memory = self.memory_get(id)?;
        self.append_event(
            project,
            EventPayload::MemoryValidated {
                memory_id: memory.id,
            },
        )?;
        Ok(())
    }
}
