use crate::core::loader::quote_identifier;
use crate::domain::model::{CellValue, QueryResult, TabularResult};
use crate::domain::ports::TableStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

/// In-memory SQLite table store.
///
/// The pool holds a single connection that never expires, since every
/// connection to `sqlite::memory:` opens a separate empty database.
#[derive(Debug, Clone)]
pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        tracing::debug!("💾 Opened in-memory SQLite store");
        Ok(Self { pool })
    }
}

/// Column affinity from the values a column holds.
fn affinity(table: &TabularResult, column: &str) -> &'static str {
    let mut kind: Option<&'static str> = None;
    for value in table.column_values(column) {
        let this = match value {
            CellValue::Null => continue,
            CellValue::Bool(_) | CellValue::Integer(_) => "INTEGER",
            CellValue::Float(_) => "REAL",
            CellValue::Text(_) | CellValue::Array(_) => return "TEXT",
        };
        kind = match (kind, this) {
            (None, k) => Some(k),
            (Some("INTEGER"), "INTEGER") => Some("INTEGER"),
            _ => Some("REAL"),
        };
    }
    kind.unwrap_or("TEXT")
}

fn decode_row(row: &SqliteRow) -> Result<Vec<CellValue>> {
    let mut values = Vec::with_capacity(row.len());
    for index in 0..row.len() {
        let storage = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };
        let value = match storage.as_deref() {
            None => CellValue::Null,
            Some("INTEGER") => CellValue::Integer(row.try_get::<i64, _>(index)?),
            Some("REAL") => CellValue::Float(row.try_get::<f64, _>(index)?),
            Some("BLOB") => {
                let bytes: Vec<u8> = row.try_get(index)?;
                CellValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(_) => CellValue::Text(row.try_get::<String, _>(index)?),
        };
        values.push(value);
    }
    Ok(values)
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn table_columns(&self, name: &str) -> Result<Option<Vec<String>>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info(?) ORDER BY cid")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.into_iter().map(|(name,)| name).collect()))
    }

    async fn create_or_replace_table(&self, name: &str, table: &TabularResult) -> Result<()> {
        let quoted = quote_identifier(name);
        let definitions: Vec<String> = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_identifier(c), affinity(table, c)))
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quoted))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", quoted, definitions.join(", ")))
            .execute(&mut *tx)
            .await?;

        if !table.columns().is_empty() {
            let insert = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quoted,
                table
                    .columns()
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", "),
                vec!["?"; table.columns().len()].join(", ")
            );

            for row in table.rows() {
                let mut query = sqlx::query(&insert);
                for value in row.values() {
                    query = match value {
                        CellValue::Null => query.bind(None::<String>),
                        CellValue::Bool(b) => query.bind(i64::from(*b)),
                        CellValue::Integer(i) => query.bind(*i),
                        CellValue::Float(f) => query.bind(*f),
                        CellValue::Text(s) => query.bind(s.clone()),
                        CellValue::Array(_) => query.bind(value.render()),
                    };
                }
                query.execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        tracing::debug!("💾 Wrote {} rows to SQLite table {}", table.len(), quoted);
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<QueryResult> {
        let prepared = (&self.pool).prepare(statement).await?;
        let columns = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = sqlx::query(statement).fetch_all(&self.pool).await?;
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

        Ok(QueryResult { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Row;
    use serde_json::json;

    fn sample_table() -> TabularResult {
        let rows = vec![
            Row::from([
                ("order_id".to_string(), CellValue::Integer(1)),
                ("paid".to_string(), CellValue::Bool(true)),
                ("total_amount".to_string(), CellValue::Float(12.5)),
                ("tags".to_string(), CellValue::Array(vec![json!("a")])),
            ]),
            Row::from([
                ("order_id".to_string(), CellValue::Integer(2)),
                ("paid".to_string(), CellValue::Null),
                ("total_amount".to_string(), CellValue::Integer(3)),
                ("tags".to_string(), CellValue::Array(vec![])),
            ]),
        ];
        TabularResult::from_rows(rows, &[])
    }

    #[test]
    fn test_affinity_inference() {
        let table = sample_table();
        assert_eq!(affinity(&table, "order_id"), "INTEGER");
        assert_eq!(affinity(&table, "paid"), "INTEGER");
        assert_eq!(affinity(&table, "total_amount"), "REAL");
        assert_eq!(affinity(&table, "tags"), "TEXT");
    }

    #[tokio::test]
    async fn test_create_and_query_round_trip() {
        let store = SqliteTableStore::in_memory().await.unwrap();
        assert_eq!(store.table_columns("orders").await.unwrap(), None);

        store.create_or_replace_table("orders", &sample_table()).await.unwrap();

        assert_eq!(
            store.table_columns("orders").await.unwrap(),
            Some(vec![
                "order_id".to_string(),
                "paid".to_string(),
                "total_amount".to_string(),
                "tags".to_string(),
            ])
        );

        let result = store
            .query("SELECT order_id, paid, total_amount, tags FROM orders ORDER BY order_id")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["order_id", "paid", "total_amount", "tags"]);
        assert_eq!(
            result.rows[0],
            vec![
                CellValue::Integer(1),
                CellValue::Integer(1),
                CellValue::Float(12.5),
                CellValue::Text("[\"a\"]".to_string()),
            ]
        );
        assert_eq!(result.rows[1][1], CellValue::Null);
        assert_eq!(result.rows[1][2], CellValue::Float(3.0));
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let store = SqliteTableStore::in_memory().await.unwrap();
        let empty = TabularResult::from_rows(Vec::new(), &["discount_code".to_string()]);

        store.create_or_replace_table("t", &empty).await.unwrap();
        let result = store.query("SELECT * FROM t").await.unwrap();

        assert_eq!(result.columns, vec!["discount_code"]);
        assert!(result.is_empty());
    }
}
