//! Embedded SQLite backend: rusqlite in WAL mode with the sqlite-vec
//! extension registered once per process.

use std::path::Path;
use std::sync::Once;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::row::{vector_to_blob, Param, Row, Scalar};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

pub(crate) struct SqliteConn {
    conn: Connection,
}

impl SqliteConn {
    pub(crate) fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        load_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn, busy_timeout_ms)?;
        Ok(Self { conn })
    }

    pub(crate) fn open_in_memory() -> Result<Self> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
        Ok(())
    }

    pub(crate) fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let values: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cols = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                cols.push((name.clone(), map_value(row.get_ref(idx)?)));
            }
            out.push(Row::new(cols));
        }
        Ok(out)
    }

    pub(crate) fn exec_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn to_sql_value(param: &Param) -> SqlValue {
    match param {
        Param::Null => SqlValue::Null,
        Param::I64(v) => SqlValue::Integer(*v),
        Param::F64(v) => SqlValue::Real(*v),
        Param::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Param::Text(s) => SqlValue::Text(s.clone()),
        Param::Json(v) => SqlValue::Text(v.to_string()),
        Param::Vector(v) => SqlValue::Blob(vector_to_blob(v)),
        Param::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn map_value(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(v) => Scalar::I64(v),
        ValueRef::Real(v) => Scalar::F64(v),
        ValueRef::Text(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Scalar::Blob(bytes.to_vec()),
    }
}
