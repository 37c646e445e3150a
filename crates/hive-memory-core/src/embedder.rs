//! The embedding provider contract.
//!
//! The concrete HTTP client lives outside the kernel; everything here treats
//! the embedder as a pluggable collaborator that produces fixed-width
//! vectors. Implementations are synchronous; async callers wrap them in
//! `tokio::task::spawn_blocking`.

use hive_store::{Result, StoreError};

/// Number of dimensions every embedding must have.
pub const EMBEDDING_DIM: usize = 1024;

/// Reported by [`Embedder::health_check`].
#[derive(Debug, Clone)]
pub struct EmbedderHealth {
    pub ok: bool,
    pub model: String,
}

/// Produces L2-normalized vectors of exactly [`EMBEDDING_DIM`] dimensions.
///
/// A provider that cannot reach its backend returns
/// [`StoreError::Unavailable`]; `store` surfaces that, while `find` falls
/// back to full-text search.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn health_check(&self) -> Result<EmbedderHealth>;
}

/// Validate a vector returned by a provider before it reaches storage.
pub fn check_dimensions(embedding: &[f32]) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(StoreError::Invalid(format!(
            "embedder returned {} dimensions, expected {EMBEDDING_DIM}",
            embedding.len()
        )));
    }
    Ok(())
}
