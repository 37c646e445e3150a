//! Uniform query/exec/transaction surface over two storage backends.
//!
//! The kernel writes canonical SQL with `?` placeholders and normalized
//! [`Param`]/[`Row`] values; this crate owns every dialect difference. The
//! embedded SQLite driver (with sqlite-vec) is the default; setting a
//! `postgres://` URL routes every connection to a server that holds the
//! writer instead.

mod error;
mod migrate;
mod postgres;
mod row;
mod sqlite;

use std::path::Path;
use std::sync::Mutex;

pub use error::{Result, StoreError};
pub use migrate::{run_migrations, Migration};
pub use row::{vector_to_blob, vector_to_literal, Param, Row, Scalar};

/// Which SQL dialect the active backend speaks. Only schema modules consult
/// this; operational call sites stay dialect-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

enum Conn {
    Sqlite(sqlite::SqliteConn),
    Postgres(postgres::PostgresConn),
}

impl Conn {
    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        match self {
            Self::Sqlite(c) => c.query(sql, params),
            Self::Postgres(c) => c.query(sql, params),
        }
    }

    fn exec_batch(&mut self, sql: &str) -> Result<()> {
        match self {
            Self::Sqlite(c) => c.exec_batch(sql),
            Self::Postgres(c) => c.exec_batch(sql),
        }
    }
}

/// One logical database connection behind a mutex. All writes from this
/// process serialize here; cross-process atomicity is the database's job.
pub struct Db {
    conn: Mutex<Conn>,
    dialect: Dialect,
}

impl Db {
    /// Open (or create) an embedded SQLite database at `path`.
    pub fn open_sqlite(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        let conn = sqlite::SqliteConn::open(path, busy_timeout_ms)?;
        Ok(Self {
            conn: Mutex::new(Conn::Sqlite(conn)),
            dialect: Dialect::Sqlite,
        })
    }

    /// In-memory SQLite database, for tests.
    pub fn open_sqlite_memory() -> Result<Self> {
        let conn = sqlite::SqliteConn::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(Conn::Sqlite(conn)),
            dialect: Dialect::Sqlite,
        })
    }

    /// Connect to a Postgres server that owns the writer.
    pub fn connect_postgres(url: &str) -> Result<Self> {
        let conn = postgres::PostgresConn::connect(url)?;
        Ok(Self {
            conn: Mutex::new(Conn::Postgres(conn)),
            dialect: Dialect::Postgres,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run a read or a single standalone statement.
    pub fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        let mut conn = self.conn.lock().expect("db mutex poisoned");
        conn.query(sql, params)
    }

    /// Execute one or more statements without parameters.
    pub fn exec(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn.lock().expect("db mutex poisoned");
        conn.exec_batch(sql)
    }

    /// Run `f` inside a transaction with all-or-nothing semantics.
    ///
    /// SQLite takes the write lock up front (`BEGIN IMMEDIATE`) so
    /// read-check-write sequences inside `f` cannot race a concurrent
    /// writer. A rollback failure after a caller error surfaces a composite
    /// `Transient` error naming both.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().expect("db mutex poisoned");
        let begin = match self.dialect {
            Dialect::Sqlite => "BEGIN IMMEDIATE",
            Dialect::Postgres => "BEGIN",
        };
        conn.exec_batch(begin)?;
        let result = {
            let mut tx = Tx {
                conn: &mut *conn,
                dialect: self.dialect,
            };
            f(&mut tx)
        };
        match result {
            Ok(value) => {
                conn.exec_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = conn.exec_batch("ROLLBACK") {
                    return Err(StoreError::Transient(format!(
                        "rollback failed after error: {err}; rollback: {rb}"
                    )));
                }
                Err(err)
            }
        }
    }
}

/// Handle passed to [`Db::transaction`] closures. Queries run eagerly on the
/// open transaction, so intra-transaction reads observe earlier writes.
pub struct Tx<'a> {
    conn: &'a mut Conn,
    dialect: Dialect,
}

impl Tx<'_> {
    pub fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        self.conn.query(sql, params)
    }

    pub fn exec(&mut self, sql: &str) -> Result<()> {
        self.conn.exec_batch(sql)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Db {
        let db = Db::open_sqlite_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        db
    }

    #[test]
    fn query_returns_normalized_rows() {
        let db = scratch();
        db.query(
            "INSERT INTO t (id, name) VALUES (?, ?)",
            &[Param::I64(1), Param::from("alpha")],
        )
        .unwrap();
        let rows = db.query("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("id").unwrap(), 1);
        assert_eq!(rows[0].get_str("name").unwrap(), "alpha");
    }

    #[test]
    fn transaction_commits_on_ok() {
        let db = scratch();
        db.transaction(|tx| {
            tx.query(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                &[Param::I64(1), Param::from("a")],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.query("SELECT id FROM t", &[]).unwrap().len(), 1);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let db = scratch();
        let res: Result<()> = db.transaction(|tx| {
            tx.query(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                &[Param::I64(1), Param::from("a")],
            )?;
            Err(StoreError::Invalid("boom".into()))
        });
        assert!(res.is_err());
        assert!(db.query("SELECT id FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn intra_transaction_reads_see_writes() {
        let db = scratch();
        db.transaction(|tx| {
            tx.query(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                &[Param::I64(1), Param::from("a")],
            )?;
            let rows = tx.query("SELECT COUNT(*) AS n FROM t", &[])?;
            assert_eq!(rows[0].get_i64("n")?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn sqlite_vec_is_loaded() {
        let db = Db::open_sqlite_memory().unwrap();
        let rows = db.query("SELECT vec_version() AS v", &[]).unwrap();
        assert!(!rows[0].get_str("v").unwrap().is_empty());
    }
}
