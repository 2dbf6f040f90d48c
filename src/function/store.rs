//! Stored functions
//!
//! Named step lists persisted as JSON in the `_function` system table.

use std::sync::Arc;

use serde::Serialize;

use super::FunctionStep;
use crate::catalog::system_tables::SYSTEM_FUNCTIONS;
use crate::catalog::SchemaError;
use crate::ddl::validate_identifier;
use crate::error::{Error, Result};
use crate::storage::{Datum, StorageEngine};

/// A stored function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFunction {
    pub name: String,
    #[serde(rename = "functions")]
    pub steps: Vec<FunctionStep>,
}

/// Access to stored functions
pub struct FunctionStore {
    engine: Arc<dyn StorageEngine>,
}

impl FunctionStore {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Store a new function after validating its steps
    pub fn save(&self, name: &str, steps: &[FunctionStep]) -> Result<()> {
        validate_identifier("function", name)?;
        for step in steps {
            step.validate()?;
        }
        let json = serde_json::to_string(steps)
            .map_err(|e| Error::validation(format!("unserialisable function: {e}")))?;

        let tx = self.engine.begin_write()?;
        let exists = !tx
            .query(
                &format!("SELECT 1 FROM \"{SYSTEM_FUNCTIONS}\" WHERE name = ?1"),
                &[Datum::from(name)],
            )?
            .is_empty();
        if exists {
            return Err(SchemaError::FunctionExists(name.to_string()).into());
        }
        tx.execute(
            &format!("INSERT INTO \"{SYSTEM_FUNCTIONS}\" (name, function) VALUES (?1, ?2)"),
            &[Datum::from(name), Datum::Text(json)],
        )?;
        tx.commit()?;

        tracing::info!(function = %name, steps = steps.len(), "Saved function");
        Ok(())
    }

    /// Names of stored functions, optionally filtered by a substring
    pub fn list(&self, search: Option<&str>) -> Result<Vec<String>> {
        let tx = self.engine.begin_read()?;
        let rows = match search.filter(|s| !s.is_empty()) {
            Some(s) => tx.query(
                &format!(
                    "SELECT name FROM \"{SYSTEM_FUNCTIONS}\" WHERE instr(name, ?1) > 0 ORDER BY name"
                ),
                &[Datum::from(s)],
            )?,
            None => tx.query(
                &format!("SELECT name FROM \"{SYSTEM_FUNCTIONS}\" ORDER BY name"),
                &[],
            )?,
        };
        Ok(rows
            .iter()
            .filter_map(|r| r.get("name").and_then(Datum::as_str).map(String::from))
            .collect())
    }

    /// Load a stored function
    pub fn get(&self, name: &str) -> Result<StoredFunction> {
        let tx = self.engine.begin_read()?;
        let rows = tx.query(
            &format!("SELECT function FROM \"{SYSTEM_FUNCTIONS}\" WHERE name = ?1"),
            &[Datum::from(name)],
        )?;
        drop(tx);

        let json = rows
            .first()
            .and_then(|r| r.get("function"))
            .and_then(Datum::as_str)
            .ok_or_else(|| SchemaError::FunctionNotFound(name.to_string()))?;
        let steps = serde_json::from_str(json).map_err(|e| SchemaError::CorruptDescriptor {
            table: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(StoredFunction {
            name: name.to_string(),
            steps,
        })
    }

    /// Delete a stored function
    pub fn delete(&self, name: &str) -> Result<()> {
        let tx = self.engine.begin_write()?;
        let n = tx.execute(
            &format!("DELETE FROM \"{SYSTEM_FUNCTIONS}\" WHERE name = ?1"),
            &[Datum::from(name)],
        )?;
        if n == 0 {
            return Err(SchemaError::FunctionNotFound(name.to_string()).into());
        }
        tx.commit()?;

        tracing::info!(function = %name, "Deleted function");
        Ok(())
    }
}
