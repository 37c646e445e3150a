//! Normalized parameters and rows shared by both backends.
//!
//! Callers bind [`Param`] values against canonical `?` placeholders and read
//! [`Row`]s whose scalars carry no dialect-specific types: JSON columns come
//! back as text that [`Row::get_json`] parses, timestamps as `i64` millis,
//! vectors as raw float blobs.

use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};

/// A normalized bind parameter.
#[derive(Debug, Clone)]
pub enum Param {
    Null,
    I64(i64),
    F64(f64),
    Bool(bool),
    Text(String),
    /// Serialized to the backend's JSON representation (TEXT / JSONB).
    Json(JsonValue),
    /// A fixed-width float vector; little-endian blob on SQLite, pgvector
    /// literal on Postgres.
    Vector(Vec<f32>),
    Blob(Vec<u8>),
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<String>> for Param {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<Option<i64>> for Param {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::I64)
    }
}

/// A single normalized column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    I64(i64),
    F64(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One result row: column names in select order plus normalized scalars.
#[derive(Debug, Clone)]
pub struct Row {
    cols: Vec<(String, Scalar)>,
}

impl Row {
    pub fn new(cols: Vec<(String, Scalar)>) -> Self {
        Self { cols }
    }

    fn find(&self, name: &str) -> Option<&Scalar> {
        self.cols.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn required(&self, name: &str) -> Result<&Scalar> {
        self.find(name)
            .ok_or_else(|| StoreError::Corruption(format!("missing column `{name}`")))
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.required(name)? {
            Scalar::Text(s) => Ok(s),
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not text: {other:?}"
            ))),
        }
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.required(name)? {
            Scalar::Null => Ok(None),
            Scalar::Text(s) => Ok(Some(s)),
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not text: {other:?}"
            ))),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.required(name)? {
            Scalar::I64(v) => Ok(*v),
            // Some drivers hand numerics back as text; coerce before failing.
            Scalar::Text(s) => s.parse::<i64>().map_err(|_| {
                StoreError::Corruption(format!("column `{name}` is not an integer: {s:?}"))
            }),
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not an integer: {other:?}"
            ))),
        }
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.required(name)? {
            Scalar::Null => Ok(None),
            _ => self.get_i64(name).map(Some),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        match self.required(name)? {
            Scalar::F64(v) => Ok(*v),
            Scalar::I64(v) => Ok(*v as f64),
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not a float: {other:?}"
            ))),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        Ok(self.get_i64(name)? != 0)
    }

    /// Parse a JSON column stored as text (or JSONB on Postgres).
    pub fn get_json(&self, name: &str) -> Result<JsonValue> {
        match self.required(name)? {
            Scalar::Null => Ok(JsonValue::Null),
            Scalar::Text(s) => serde_json::from_str(s).map_err(|e| {
                StoreError::Corruption(format!("column `{name}` holds invalid JSON: {e}"))
            }),
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not JSON text: {other:?}"
            ))),
        }
    }

    /// Decode a vector column: little-endian f32 blob (SQLite) or a pgvector
    /// `[a,b,...]` text literal (Postgres).
    pub fn get_vector(&self, name: &str) -> Result<Vec<f32>> {
        match self.required(name)? {
            Scalar::Blob(bytes) => {
                if bytes.len() % 4 != 0 {
                    return Err(StoreError::Corruption(format!(
                        "column `{name}` blob length {} is not a multiple of 4",
                        bytes.len()
                    )));
                }
                Ok(bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect())
            }
            Scalar::Text(s) => {
                let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
                if trimmed.is_empty() {
                    return Ok(Vec::new());
                }
                trimmed
                    .split(',')
                    .map(|p| {
                        p.trim().parse::<f32>().map_err(|_| {
                            StoreError::Corruption(format!(
                                "column `{name}` holds a malformed vector literal"
                            ))
                        })
                    })
                    .collect()
            }
            other => Err(StoreError::Corruption(format!(
                "column `{name}` is not a vector: {other:?}"
            ))),
        }
    }
}

/// Encode a float vector as the little-endian blob sqlite-vec expects.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Encode a float vector as the `[a,b,...]` literal pgvector parses.
pub fn vector_to_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0];
        let row = Row::new(vec![("embedding".into(), Scalar::Blob(vector_to_blob(&v)))]);
        assert_eq!(row.get_vector("embedding").unwrap(), v);
    }

    #[test]
    fn vector_literal_roundtrip() {
        let v = vec![0.5f32, 3.0];
        let row = Row::new(vec![(
            "embedding".into(),
            Scalar::Text(vector_to_literal(&v)),
        )]);
        assert_eq!(row.get_vector("embedding").unwrap(), v);
    }

    #[test]
    fn integer_coercion_from_text() {
        let row = Row::new(vec![("ts".into(), Scalar::Text("1712000000000".into()))]);
        assert_eq!(row.get_i64("ts").unwrap(), 1_712_000_000_000);
    }

    #[test]
    fn missing_column_is_corruption() {
        let row = Row::new(vec![]);
        assert!(matches!(
            row.get_str("nope"),
            Err(StoreError::Corruption(_))
        ));
    }
}
