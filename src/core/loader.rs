use crate::domain::model::{QueryResult, TableHandle, TabularResult};
use crate::domain::ports::TableStore;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_identifier;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as TableLock;

/// Fixed projection run against a loaded table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    columns: Vec<String>,
}

impl Query {
    /// Every column of the table, in stored order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn projection<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn to_sql(&self, table: &str) -> String {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("SELECT {} FROM {}", projection, quote_identifier(table))
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Writes tabular results to a store and verifies them.
///
/// Loads and verifications of the same table are serialized through a lock
/// shared by every clone of the loader.
pub struct Loader<S: TableStore> {
    store: Arc<S>,
    locks: Arc<Mutex<HashMap<String, Arc<TableLock<()>>>>>,
}

impl<S: TableStore> Clone for Loader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: TableStore> Loader<S> {
    pub fn new(store: S) -> Self {
        Self::shared(Arc::new(store))
    }

    pub fn shared(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, table: &str) -> Arc<TableLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(table.to_string()).or_default())
    }

    /// Creates or replaces `table_name` with exactly the result's columns.
    pub async fn load(
        &self,
        result: &TabularResult,
        table_name: &str,
        overwrite: bool,
    ) -> Result<TableHandle> {
        validate_identifier("load.table", table_name)?;
        if result.columns().is_empty() {
            return Err(EtlError::VerificationFailed {
                table: table_name.to_string(),
                message: "result has no columns to load".to_string(),
            });
        }
        let lock = self.lock_for(table_name);
        let _guard = lock.lock().await;

        let existing = self
            .store
            .table_columns(table_name)
            .await
            .map_err(store_failed(table_name, "inspect"))?;
        if let Some(existing) = existing {
            if existing.as_slice() != result.columns() {
                if !overwrite {
                    return Err(EtlError::SchemaMismatch {
                        table: table_name.to_string(),
                        existing,
                        incoming: result.columns().to_vec(),
                    });
                }
                tracing::warn!("💾 Replacing table '{}' with a different schema", table_name);
            }
        }

        self.store
            .create_or_replace_table(table_name, result)
            .await
            .map_err(store_failed(table_name, "create"))?;

        tracing::info!(
            "💾 Loaded {} rows into '{}' ({} columns)",
            result.len(),
            table_name,
            result.columns().len()
        );

        Ok(TableHandle {
            name: table_name.to_string(),
            columns: result.columns().to_vec(),
            row_count: result.len(),
        })
    }

    /// Runs the projection and checks it against the handle.
    pub async fn verify(&self, handle: &TableHandle, query: &Query) -> Result<QueryResult> {
        let lock = self.lock_for(&handle.name);
        let _guard = lock.lock().await;

        let stored = self
            .store
            .table_columns(&handle.name)
            .await
            .map_err(store_failed(&handle.name, "inspect"))?
            .ok_or_else(|| verification_failed(handle, "table does not exist".to_string()))?;
        if stored != handle.columns {
            return Err(verification_failed(
                handle,
                format!("stored columns {:?} differ from loaded columns {:?}", stored, handle.columns),
            ));
        }

        let missing: Vec<&str> = query
            .columns()
            .iter()
            .filter(|c| !stored.contains(c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(verification_failed(
                handle,
                format!("missing columns: {}", missing.join(", ")),
            ));
        }

        let result = self
            .store
            .query(&query.to_sql(&handle.name))
            .await
            .map_err(store_failed(&handle.name, "query"))?;
        if result.len() != handle.row_count {
            return Err(verification_failed(
                handle,
                format!("expected {} rows, found {}", handle.row_count, result.len()),
            ));
        }

        tracing::info!("🔎 Verified '{}': {} rows, columns {:?}", handle.name, result.len(), result.columns);
        Ok(result)
    }
}

fn verification_failed(handle: &TableHandle, message: String) -> EtlError {
    EtlError::VerificationFailed {
        table: handle.name.clone(),
        message,
    }
}

/// Attaches the table name to a bare store error.
fn store_failed<'a>(table: &'a str, operation: &'a str) -> impl FnOnce(EtlError) -> EtlError + 'a {
    move |err| match err {
        EtlError::StoreError(source) => EtlError::TableStoreFailed {
            table: table.to_string(),
            operation: operation.to_string(),
            source,
        },
        other => other,
    }
}
