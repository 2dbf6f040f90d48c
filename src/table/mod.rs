//! Table manager
//!
//! Orchestrates runtime schema changes. Every mutation runs the generated
//! DDL and the matching catalog edit inside one write transaction, so the
//! live schema and the catalog commit or roll back together. Reads go
//! through `SchemaCache`, which every mutation invalidates after commit and
//! before returning.

pub mod cache;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::system_tables::{self, is_system_table};
use crate::catalog::{AccessRules, DescriptorField, IndexSpec, SchemaError, TableDescriptor, TableInfo};
use crate::ddl::{
    CreateTableSpec, DdlGenerator, StatementKind, TableKind, PASSWORD_COLUMN, RELATION_TYPE,
    SALT_COLUMN,
};
use crate::error::Result;
use crate::storage::{ColumnInfo, Datum, ObjectKind, StorageEngine, Transaction};

pub use cache::{CacheKey, CachedValue, SchemaCache};

/// Column metadata as exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub cid: i64,
    pub name: String,
    /// Declared type, or `RELATION` for foreign-key columns
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(rename = "notnull")]
    pub not_null: bool,
    #[serde(rename = "pk")]
    pub primary_key: bool,
    #[serde(rename = "dflt_value")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl From<ColumnInfo> for ColumnDescriptor {
    fn from(info: ColumnInfo) -> Self {
        let data_type = match info.reference {
            Some(_) => RELATION_TYPE.to_string(),
            None => info.data_type,
        };
        Self {
            cid: info.cid,
            name: info.name,
            data_type,
            not_null: info.not_null,
            primary_key: info.primary_key,
            default: info.default,
            reference: info.reference,
        }
    }
}

/// Entry of `list_tables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub auth: bool,
}

/// Outcome of comparing the catalog with the live schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Catalog entries with no live table
    pub missing_tables: Vec<String>,
    /// Live user tables with no catalog entry
    pub uncatalogued_tables: Vec<String>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.missing_tables.is_empty() && self.uncatalogued_tables.is_empty()
    }
}

/// Columns hidden from a listing of an auth table
pub fn redacted_columns(include_auth: bool) -> &'static [&'static str] {
    if include_auth {
        &[SALT_COLUMN]
    } else {
        &[SALT_COLUMN, PASSWORD_COLUMN]
    }
}

fn normalize_fields(fields: &[DescriptorField]) -> Vec<DescriptorField> {
    if fields.is_empty() {
        return DescriptorField::ALL.to_vec();
    }
    fields
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Tables whose foreign keys point at `table`
fn referencing_tables(tx: &dyn Transaction, table: &str) -> Result<Vec<String>> {
    let rows = tx.query(
        r#"SELECT DISTINCT m.name AS name
           FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS fk
           WHERE m.type = 'table' AND fk."table" = ?1 AND m.name != ?1
           ORDER BY m.name"#,
        &[Datum::from(table)],
    )?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get("name").and_then(Datum::as_str).map(String::from))
        .collect())
}

fn ensure_user_table(name: &str) -> Result<()> {
    if is_system_table(name) {
        return Err(SchemaError::SystemTable(name.to_string()).into());
    }
    Ok(())
}

/// Table manager
pub struct TableManager {
    engine: Arc<dyn StorageEngine>,
    cache: SchemaCache,
    ddl: DdlGenerator,
}

impl TableManager {
    pub fn new(engine: Arc<dyn StorageEngine>, cache_ttl: Duration, ddl: DdlGenerator) -> Self {
        Self {
            engine,
            cache: SchemaCache::new(cache_ttl),
            ddl,
        }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Create a table and its catalog descriptor atomically
    pub fn create(&self, spec: &CreateTableSpec) -> Result<()> {
        ensure_user_table(&spec.name)?;
        let statements = self.ddl.create_table(spec)?;

        let tx = self.engine.begin_write()?;
        if system_tables::descriptor_exists(tx.as_ref(), &spec.name)?
            || tx.object_exists(ObjectKind::Table, &spec.name)?
        {
            return Err(SchemaError::TableExists(spec.name.clone()).into());
        }
        for reference in spec.references() {
            if reference != spec.name
                && !system_tables::descriptor_exists(tx.as_ref(), reference)?
            {
                return Err(SchemaError::TableNotFound(reference.to_string()).into());
            }
        }

        for stmt in &statements {
            if let StatementKind::Trigger { name } = &stmt.kind {
                if tx.object_exists(ObjectKind::Trigger, name)? {
                    tracing::debug!(trigger = %name, "Trigger already present");
                    continue;
                }
            }
            tx.execute(&stmt.sql, &[])?;
        }

        let mut desc = TableDescriptor::new(&spec.name, spec.kind == TableKind::Users);
        desc.indexes = spec.indexes.clone();
        system_tables::insert_descriptor(tx.as_ref(), &desc)?;
        tx.commit()?;

        self.cache.invalidate_table(&spec.name);
        tracing::info!(table = %spec.name, auth = desc.auth, "Created table");
        Ok(())
    }

    /// Rename a table, its catalog entry and its update trigger
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        ensure_user_table(old)?;
        ensure_user_table(new)?;
        let rename_sql = self.ddl.rename_table(old, new)?;

        let tx = self.engine.begin_write()?;
        if !system_tables::descriptor_exists(tx.as_ref(), old)? {
            return Err(SchemaError::TableNotFound(old.to_string()).into());
        }
        if system_tables::descriptor_exists(tx.as_ref(), new)?
            || tx.object_exists(ObjectKind::Table, new)?
        {
            return Err(SchemaError::TableExists(new.to_string()).into());
        }

        // Children's foreign keys are rewritten to the new name
        let mut affected = referencing_tables(tx.as_ref(), old)?;
        tx.execute(&self.ddl.drop_trigger(old)?, &[])?;
        tx.execute(&rename_sql, &[])?;
        system_tables::rename_descriptor(tx.as_ref(), old, new)?;
        let trigger = self.ddl.create_trigger(new)?;
        if let StatementKind::Trigger { name } = &trigger.kind {
            if !tx.object_exists(ObjectKind::Trigger, name)? {
                tx.execute(&trigger.sql, &[])?;
            }
        }
        tx.commit()?;

        affected.push(old.to_string());
        affected.push(new.to_string());
        self.cache.invalidate_tables(&affected);
        tracing::info!(table = %old, new_name = %new, "Renamed table");
        Ok(())
    }

    /// Drop a table and its catalog descriptor atomically
    pub fn drop_table(&self, name: &str) -> Result<()> {
        ensure_user_table(name)?;
        let drop_sql = self.ddl.drop_table(name)?;

        let tx = self.engine.begin_write()?;
        if !system_tables::descriptor_exists(tx.as_ref(), name)? {
            return Err(SchemaError::TableNotFound(name.to_string()).into());
        }
        let mut affected = referencing_tables(tx.as_ref(), name)?;
        tx.execute(&self.ddl.drop_trigger(name)?, &[])?;
        if tx.object_exists(ObjectKind::Table, name)? {
            tx.execute(&drop_sql, &[])?;
        } else {
            tracing::warn!(table = %name, "Catalog entry had no live table");
        }
        system_tables::delete_descriptor(tx.as_ref(), name)?;
        tx.commit()?;

        affected.push(name.to_string());
        self.cache.invalidate_tables(&affected);
        tracing::info!(table = %name, "Dropped table");
        Ok(())
    }

    /// Descriptor restricted to `fields` (all attributes when empty)
    pub fn describe(&self, name: &str, fields: &[DescriptorField]) -> Result<TableInfo> {
        let fields = normalize_fields(fields);
        let key = CacheKey::Describe {
            table: name.to_string(),
            fields: fields.clone(),
        };
        if let Some(CachedValue::Describe(info)) = self.cache.get(&key) {
            return Ok(info);
        }

        let generation = self.cache.generation();
        let tx = self.engine.begin_read()?;
        let info = system_tables::fetch_info(tx.as_ref(), name, &fields)?
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()))?;
        drop(tx);

        self.cache
            .insert(key, CachedValue::Describe(info.clone()), generation);
        Ok(info)
    }

    /// Describe through an open transaction
    ///
    /// Serves from the cache when possible but never fills it, since the
    /// transaction may hold uncommitted changes.
    pub fn describe_in(
        &self,
        tx: &dyn Transaction,
        name: &str,
        fields: &[DescriptorField],
    ) -> Result<TableInfo> {
        let fields = normalize_fields(fields);
        let key = CacheKey::Describe {
            table: name.to_string(),
            fields: fields.clone(),
        };
        if let Some(CachedValue::Describe(info)) = self.cache.get(&key) {
            return Ok(info);
        }
        system_tables::fetch_info(tx, name, &fields)?
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()).into())
    }

    /// Live columns of a table, with auth columns redacted
    ///
    /// `salt` never appears; `password` appears only with `include_auth`.
    pub fn list_columns(&self, name: &str, include_auth: bool) -> Result<Arc<Vec<ColumnDescriptor>>> {
        let key = CacheKey::Columns {
            table: name.to_string(),
            include_auth,
        };
        if let Some(CachedValue::Columns(cols)) = self.cache.get(&key) {
            return Ok(cols);
        }

        let generation = self.cache.generation();
        let tx = self.engine.begin_read()?;
        let info = system_tables::fetch_info(tx.as_ref(), name, &[DescriptorField::Auth])?
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()))?;
        let columns = tx.columns(name)?;
        drop(tx);

        let hidden: &[&str] = if info.is_auth() {
            redacted_columns(include_auth)
        } else {
            &[]
        };
        let columns: Vec<ColumnDescriptor> = columns
            .into_iter()
            .filter(|c| !hidden.contains(&c.name.as_str()))
            .map(ColumnDescriptor::from)
            .collect();
        let columns = Arc::new(columns);

        self.cache
            .insert(key, CachedValue::Columns(Arc::clone(&columns)), generation);
        Ok(columns)
    }

    /// Names of the user-created indexes of a table
    pub fn list_indexes(&self, name: &str) -> Result<Vec<String>> {
        let tx = self.engine.begin_read()?;
        if !system_tables::descriptor_exists(tx.as_ref(), name)? {
            return Err(SchemaError::TableNotFound(name.to_string()).into());
        }
        Ok(tx.indexes(name)?)
    }

    /// Create one index and record it in the table's descriptor
    pub fn create_index(&self, table: &str, index: &IndexSpec) -> Result<()> {
        ensure_user_table(table)?;
        let stmt = self.ddl.create_index(table, index)?;

        let tx = self.engine.begin_write()?;
        let mut desc = system_tables::load_descriptor(tx.as_ref(), table)?
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;
        tx.execute(&stmt.sql, &[])?;
        desc.indexes.push(index.clone());
        system_tables::update_indexes(tx.as_ref(), table, &desc.indexes)?;
        tx.commit()?;

        self.cache.invalidate_table(table);
        tracing::info!(table = %table, index = %index.name, "Created index");
        Ok(())
    }

    /// Drop indexes by name; absent indexes are not an error
    pub fn drop_indexes<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let statements = names
            .iter()
            .map(|n| self.ddl.drop_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.engine.begin_write()?;
        for sql in &statements {
            tx.execute(sql, &[])?;
        }

        let mut affected = Vec::new();
        for mut desc in system_tables::list_descriptors(tx.as_ref(), None)? {
            let before = desc.indexes.len();
            desc.indexes
                .retain(|i| !names.iter().any(|n| n.as_ref() == i.name));
            if desc.indexes.len() != before {
                system_tables::update_indexes(tx.as_ref(), &desc.name, &desc.indexes)?;
                affected.push(desc.name);
            }
        }
        tx.commit()?;

        self.cache.invalidate_tables(&affected);
        tracing::info!(count = names.len(), "Dropped indexes");
        Ok(())
    }

    /// Replace the access rules of a table
    pub fn update_rules(&self, table: &str, rules: &AccessRules) -> Result<()> {
        ensure_user_table(table)?;
        let tx = self.engine.begin_write()?;
        if !system_tables::descriptor_exists(tx.as_ref(), table)? {
            return Err(SchemaError::TableNotFound(table.to_string()).into());
        }
        system_tables::update_rules(tx.as_ref(), table, rules)?;
        tx.commit()?;

        self.cache.invalidate_table(table);
        tracing::info!(table = %table, "Updated access rules");
        Ok(())
    }

    /// Non-system tables, optionally filtered by a name substring
    pub fn list_tables(&self, search: Option<&str>) -> Result<Vec<TableSummary>> {
        let tx = self.engine.begin_read()?;
        Ok(system_tables::list_descriptors(tx.as_ref(), search)?
            .into_iter()
            .filter(|d| !d.system)
            .map(|d| TableSummary {
                name: d.name,
                auth: d.auth,
            })
            .collect())
    }

    /// Compare catalog entries with live tables
    pub fn reconcile(&self) -> Result<Reconciliation> {
        let tx = self.engine.begin_read()?;
        let catalogued = system_tables::catalog_names(tx.as_ref())?;
        let live = tx.tables()?;

        let missing_tables = catalogued
            .iter()
            .filter(|name| !live.contains(name))
            .cloned()
            .collect();
        let uncatalogued_tables = live
            .iter()
            .filter(|name| !is_system_table(name) && !catalogued.contains(name))
            .cloned()
            .collect();
        Ok(Reconciliation {
            missing_tables,
            uncatalogued_tables,
        })
    }
}
