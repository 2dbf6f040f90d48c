//! System tables for catalog persistence
//!
//! `_table` holds one descriptor row per catalogued table and `_function`
//! holds stored function definitions. Both are created on first open and
//! live in the same database as user tables, so catalog edits commit or
//! roll back together with the DDL they describe.

use super::{AccessRules, DescriptorField, IndexSpec, SchemaError, TableDescriptor, TableInfo};
use crate::error::Result;
use crate::storage::{Datum, Record, Transaction};

/// System table names
pub const SYSTEM_TABLES: &str = "_table";
pub const SYSTEM_FUNCTIONS: &str = "_function";

/// Check if a table name is reserved for system tables
pub fn is_system_table(name: &str) -> bool {
    name.starts_with('_')
}

const CREATE_TABLES_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "_table" (
    name TEXT PRIMARY KEY NOT NULL,
    auth BOOLEAN NOT NULL DEFAULT 0,
    system BOOLEAN NOT NULL DEFAULT 0,
    indexes TEXT NOT NULL DEFAULT '[]',
    view_rule TEXT NOT NULL DEFAULT 'ADMIN_ONLY',
    read_rule TEXT NOT NULL DEFAULT 'ADMIN_ONLY',
    insert_rule TEXT NOT NULL DEFAULT 'ADMIN_ONLY',
    update_rule TEXT NOT NULL DEFAULT 'ADMIN_ONLY',
    delete_rule TEXT NOT NULL DEFAULT 'ADMIN_ONLY'
)"#;

const CREATE_FUNCTIONS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS "_function" (
    name TEXT PRIMARY KEY NOT NULL,
    function TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)"#;

/// Descriptor registered for the function store at bootstrap
pub fn functions_table_descriptor() -> TableDescriptor {
    TableDescriptor::new(SYSTEM_FUNCTIONS, false).system()
}

/// Create the system tables if missing
///
/// Safe to run on every open.
pub fn bootstrap(tx: &dyn Transaction) -> Result<()> {
    tx.execute(CREATE_TABLES_TABLE, &[])?;
    tx.execute(CREATE_FUNCTIONS_TABLE, &[])?;
    if !descriptor_exists(tx, SYSTEM_FUNCTIONS)? {
        insert_descriptor(tx, &functions_table_descriptor())?;
        tracing::debug!("Registered function store in catalog");
    }
    Ok(())
}

/// Whether a descriptor row exists for `name`
pub fn descriptor_exists(tx: &dyn Transaction, name: &str) -> Result<bool> {
    let rows = tx.query(
        r#"SELECT 1 FROM "_table" WHERE name = ?1"#,
        &[Datum::from(name)],
    )?;
    Ok(!rows.is_empty())
}

/// Write a new descriptor row
pub fn insert_descriptor(tx: &dyn Transaction, desc: &TableDescriptor) -> Result<()> {
    let mut columns = Vec::with_capacity(DescriptorField::ALL.len());
    let mut params = Vec::with_capacity(DescriptorField::ALL.len());
    for field in DescriptorField::ALL {
        let accessor = field.accessor();
        columns.push(accessor.column);
        params.push((accessor.get)(desc)?);
    }
    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        r#"INSERT INTO "_table" ({}) VALUES ({})"#,
        columns.join(", "),
        placeholders.join(", ")
    );
    tx.execute(&sql, &params)?;
    Ok(())
}

/// Decode the requested attributes of one descriptor row
pub fn record_to_info(
    table: &str,
    record: &Record,
    fields: &[DescriptorField],
) -> Result<TableInfo> {
    let mut info = TableInfo::default();
    for field in fields {
        let accessor = field.accessor();
        let value = record.get(accessor.column).ok_or_else(|| {
            SchemaError::CorruptDescriptor {
                table: table.to_string(),
                reason: format!("missing column {}", accessor.column),
            }
        })?;
        (accessor.set)(&mut info, table, value)?;
    }
    Ok(info)
}

/// Fetch the requested attributes of a descriptor
///
/// Returns `None` when no descriptor exists.
pub fn fetch_info(
    tx: &dyn Transaction,
    name: &str,
    fields: &[DescriptorField],
) -> Result<Option<TableInfo>> {
    // Always select at least one column so the row count is meaningful
    let columns: Vec<&str> = if fields.is_empty() {
        vec![DescriptorField::Name.column()]
    } else {
        fields.iter().map(|f| f.column()).collect()
    };
    let sql = format!(
        r#"SELECT {} FROM "_table" WHERE name = ?1"#,
        columns.join(", ")
    );
    let rows = tx.query(&sql, &[Datum::from(name)])?;
    match rows.first() {
        Some(record) => Ok(Some(record_to_info(name, record, fields)?)),
        None => Ok(None),
    }
}

fn info_to_descriptor(info: TableInfo) -> Option<TableDescriptor> {
    Some(TableDescriptor {
        name: info.name?,
        auth: info.auth?,
        system: info.system?,
        indexes: info.indexes?,
        rules: AccessRules {
            view_rule: info.view_rule?,
            read_rule: info.read_rule?,
            insert_rule: info.insert_rule?,
            update_rule: info.update_rule?,
            delete_rule: info.delete_rule?,
        },
    })
}

/// Load a full descriptor
pub fn load_descriptor(tx: &dyn Transaction, name: &str) -> Result<Option<TableDescriptor>> {
    Ok(fetch_info(tx, name, &DescriptorField::ALL)?.and_then(info_to_descriptor))
}

/// List full descriptors, optionally filtered by a name substring
pub fn list_descriptors(tx: &dyn Transaction, search: Option<&str>) -> Result<Vec<TableDescriptor>> {
    let columns: Vec<&str> = DescriptorField::ALL.iter().map(|f| f.column()).collect();
    let mut sql = format!(r#"SELECT {} FROM "_table""#, columns.join(", "));
    let mut params = Vec::new();
    if let Some(search) = search.filter(|s| !s.is_empty()) {
        sql.push_str(" WHERE instr(name, ?1) > 0");
        params.push(Datum::from(search));
    }
    sql.push_str(" ORDER BY name");

    let mut out = Vec::new();
    for record in tx.query(&sql, &params)? {
        let name = record
            .get("name")
            .and_then(Datum::as_str)
            .unwrap_or_default()
            .to_string();
        let info = record_to_info(&name, &record, &DescriptorField::ALL)?;
        if let Some(desc) = info_to_descriptor(info) {
            out.push(desc);
        }
    }
    Ok(out)
}

/// Names of every catalogued table
pub fn catalog_names(tx: &dyn Transaction) -> Result<Vec<String>> {
    let rows = tx.query(r#"SELECT name FROM "_table" ORDER BY name"#, &[])?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get("name").and_then(Datum::as_str).map(String::from))
        .collect())
}

/// Point a descriptor at a new table name
pub fn rename_descriptor(tx: &dyn Transaction, old: &str, new: &str) -> Result<()> {
    tx.execute(
        r#"UPDATE "_table" SET name = ?1 WHERE name = ?2"#,
        &[Datum::from(new), Datum::from(old)],
    )?;
    Ok(())
}

/// Remove a descriptor, returning whether one existed
pub fn delete_descriptor(tx: &dyn Transaction, name: &str) -> Result<bool> {
    let n = tx.execute(r#"DELETE FROM "_table" WHERE name = ?1"#, &[Datum::from(name)])?;
    Ok(n > 0)
}

/// Replace the index list of a descriptor
pub fn update_indexes(tx: &dyn Transaction, name: &str, indexes: &[IndexSpec]) -> Result<()> {
    let json = serde_json::to_string(indexes).map_err(|e| SchemaError::CorruptDescriptor {
        table: name.to_string(),
        reason: e.to_string(),
    })?;
    tx.execute(
        r#"UPDATE "_table" SET indexes = ?1 WHERE name = ?2"#,
        &[Datum::Text(json), Datum::from(name)],
    )?;
    Ok(())
}

/// Replace the access rules of a descriptor
pub fn update_rules(tx: &dyn Transaction, name: &str, rules: &AccessRules) -> Result<()> {
    tx.execute(
        r#"UPDATE "_table"
           SET view_rule = ?1, read_rule = ?2, insert_rule = ?3,
               update_rule = ?4, delete_rule = ?5
           WHERE name = ?6"#,
        &[
            Datum::from(rules.view_rule.as_str()),
            Datum::from(rules.read_rule.as_str()),
            Datum::from(rules.insert_rule.as_str()),
            Datum::from(rules.update_rule.as_str()),
            Datum::from(rules.delete_rule.as_str()),
            Datum::from(name),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ADMIN_ONLY;
    use crate::storage::{SqliteEngine, StorageEngine};

    fn setup() -> SqliteEngine {
        let engine = SqliteEngine::in_memory().unwrap();
        let tx = engine.begin_write().unwrap();
        bootstrap(tx.as_ref()).unwrap();
        tx.commit().unwrap();
        engine
    }

    #[test]
    fn test_is_system_table() {
        assert!(is_system_table("_table"));
        assert!(is_system_table("_function"));
        assert!(!is_system_table("tasks"));
    }

    #[test]
    fn test_bootstrap_idempotent() {
        let engine = setup();
        let tx = engine.begin_write().unwrap();
        bootstrap(tx.as_ref()).unwrap();
        assert_eq!(catalog_names(tx.as_ref()).unwrap(), vec!["_function"]);
        let desc = load_descriptor(tx.as_ref(), SYSTEM_FUNCTIONS)
            .unwrap()
            .unwrap();
        assert!(desc.system);
    }

    #[test]
    fn test_insert_and_load_descriptor() {
        let engine = setup();
        let tx = engine.begin_write().unwrap();
        let desc = TableDescriptor::new("users", true)
            .index(IndexSpec::new("idx_users_email", vec!["email".into()]));
        insert_descriptor(tx.as_ref(), &desc).unwrap();

        let loaded = load_descriptor(tx.as_ref(), "users").unwrap().unwrap();
        assert_eq!(loaded, desc);

        let info = fetch_info(tx.as_ref(), "users", &[DescriptorField::Auth])
            .unwrap()
            .unwrap();
        assert_eq!(info.auth, Some(true));
        assert_eq!(info.name, None);
        assert!(fetch_info(tx.as_ref(), "nope", &[]).unwrap().is_none());
    }

    #[test]
    fn test_rename_update_delete() {
        let engine = setup();
        let tx = engine.begin_write().unwrap();
        insert_descriptor(tx.as_ref(), &TableDescriptor::new("a", false)).unwrap();
        rename_descriptor(tx.as_ref(), "a", "b").unwrap();
        assert!(!descriptor_exists(tx.as_ref(), "a").unwrap());

        update_indexes(tx.as_ref(), "b", &[IndexSpec::new("i", vec!["x".into()])]).unwrap();
        let rules = AccessRules {
            read_rule: "PUBLIC".into(),
            ..AccessRules::default()
        };
        update_rules(tx.as_ref(), "b", &rules).unwrap();

        let loaded = load_descriptor(tx.as_ref(), "b").unwrap().unwrap();
        assert_eq!(loaded.indexes.len(), 1);
        assert_eq!(loaded.rules.read_rule, "PUBLIC");
        assert_eq!(loaded.rules.view_rule, ADMIN_ONLY);

        assert!(delete_descriptor(tx.as_ref(), "b").unwrap());
        assert!(!delete_descriptor(tx.as_ref(), "b").unwrap());
    }

    #[test]
    fn test_list_descriptors_search() {
        let engine = setup();
        let tx = engine.begin_write().unwrap();
        insert_descriptor(tx.as_ref(), &TableDescriptor::new("tasks", false)).unwrap();
        insert_descriptor(tx.as_ref(), &TableDescriptor::new("users", true)).unwrap();

        let all = list_descriptors(tx.as_ref(), None).unwrap();
        assert_eq!(all.len(), 3);
        let found = list_descriptors(tx.as_ref(), Some("ask")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "tasks");
    }
}
