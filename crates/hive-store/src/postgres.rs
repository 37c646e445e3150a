//! Postgres backend: a synchronous client speaking to a server that holds
//! the writer. Canonical `?` placeholders are rewritten to `$N` here so no
//! call site carries dialect-specific SQL.

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls};

use crate::error::{Result, StoreError};
use crate::row::{vector_to_literal, Param, Row, Scalar};

pub(crate) struct PostgresConn {
    client: Client,
}

impl PostgresConn {
    pub(crate) fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls)
            .map_err(|e| StoreError::Unavailable(format!("postgres connect failed: {e}")))?;
        Ok(Self { client })
    }

    pub(crate) fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        let sql = rewrite_placeholders(sql);
        let owned: Vec<Box<dyn ToSql + Sync>> = params.iter().map(to_sql_boxed).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();
        let rows = self.client.query(sql.as_str(), &refs)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cols = Vec::with_capacity(row.len());
            for (idx, col) in row.columns().iter().enumerate() {
                cols.push((col.name().to_string(), map_column(&row, idx, col.type_())?));
            }
            out.push(Row::new(cols));
        }
        Ok(out)
    }

    pub(crate) fn exec_batch(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(&rewrite_placeholders(sql))?;
        Ok(())
    }
}

/// Rewrite canonical `?` placeholders to Postgres `$N`, skipping quoted
/// string literals.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

fn to_sql_boxed(param: &Param) -> Box<dyn ToSql + Sync> {
    match param {
        Param::Null => Box::new(Option::<String>::None),
        Param::I64(v) => Box::new(*v),
        Param::F64(v) => Box::new(*v),
        Param::Bool(v) => Box::new(*v),
        Param::Text(s) => Box::new(s.clone()),
        Param::Json(v) => Box::new(v.clone()),
        // pgvector accepts its text literal; statements cast with ::vector.
        Param::Vector(v) => Box::new(vector_to_literal(v)),
        Param::Blob(b) => Box::new(b.clone()),
    }
}

fn map_column(row: &postgres::Row, idx: usize, ty: &Type) -> Result<Scalar> {
    let scalar = if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map_or(Scalar::Null, |v| Scalar::I64(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map_or(Scalar::Null, |v| Scalar::I64(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?
            .map_or(Scalar::Null, Scalar::I64)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map_or(Scalar::Null, |v| Scalar::F64(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?
            .map_or(Scalar::Null, Scalar::F64)
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?
            .map_or(Scalar::Null, |v| Scalar::I64(i64::from(v)))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?
            .map_or(Scalar::Null, |v| Scalar::Text(v.to_string()))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(Scalar::Null, Scalar::Blob)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::NAME {
        row.try_get::<_, Option<String>>(idx)?
            .map_or(Scalar::Null, Scalar::Text)
    } else {
        // pgvector and other extension types come back through their text
        // representation.
        row.try_get::<_, Option<String>>(idx)
            .map_err(|e| {
                StoreError::Corruption(format!("unsupported postgres column type {ty}: {e}"))
            })?
            .map_or(Scalar::Null, Scalar::Text)
    };
    Ok(scalar)
}

#[cfg(test)]
mod tests {
    use super::rewrite_placeholders;

    #[test]
    fn rewrites_positional_placeholders() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
    }

    #[test]
    fn leaves_quoted_question_marks_alone() {
        assert_eq!(
            rewrite_placeholders("SELECT '?' FROM t WHERE a = ?"),
            "SELECT '?' FROM t WHERE a = $1"
        );
    }

    #[test]
    fn no_placeholders_is_identity() {
        assert_eq!(rewrite_placeholders("VACUUM"), "VACUUM");
    }
}
