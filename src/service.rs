//! Funcbase service
//!
//! Ties the storage engine, table manager, row store, interpreter and function
//! store together behind one handle. Every operation is synchronous and safe to
//! call from multiple threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::caller::Caller;
use crate::catalog::{system_tables, AccessRules, DescriptorField, IndexSpec, TableInfo};
use crate::config::Config;
use crate::ddl::{CreateTableSpec, DdlGenerator};
use crate::error::{Error, Result};
use crate::function::{Binding, FunctionStep, FunctionStore, Interpreter, StoredFunction};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::rows::{RowPage, RowQuery, RowStore};
use crate::storage::{Record, SqliteEngine, StorageEngine};
use crate::table::{ColumnDescriptor, Reconciliation, TableManager, TableSummary};

/// Function outputs keyed by step output name
pub type Outputs = BTreeMap<String, Binding>;

pub struct Funcbase {
    tables: Arc<TableManager>,
    rows: RowStore,
    interpreter: Interpreter,
    functions: FunctionStore,
}

impl Funcbase {
    /// Open the configured database, creating the system tables if needed
    pub fn open(config: &Config) -> Result<Self> {
        let engine: Arc<dyn StorageEngine> = Arc::new(SqliteEngine::open(&config.sqlite())?);
        Self::with_engine(engine, config, Arc::new(RandomIdGenerator::default()))
    }

    /// Private in-memory instance with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(&Config::default())
    }

    /// Build on an existing engine and id generator
    pub fn with_engine(
        engine: Arc<dyn StorageEngine>,
        config: &Config,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let tx = engine.begin_write()?;
        system_tables::bootstrap(tx.as_ref())?;
        tx.commit()?;

        let tables = Arc::new(TableManager::new(
            Arc::clone(&engine),
            config.cache_ttl(),
            DdlGenerator::new(config.strict_field_types),
        ));
        let rows = RowStore::new(Arc::clone(&engine), Arc::clone(&tables), Arc::clone(&ids));
        let interpreter = Interpreter::new(Arc::clone(&engine), Arc::clone(&tables), ids);
        let functions = FunctionStore::new(engine);
        let service = Self {
            tables,
            rows,
            interpreter,
            functions,
        };

        let report = service.reconcile()?;
        for name in &report.missing_tables {
            tracing::warn!(table = %name, "Catalog entry has no live table");
        }
        for name in &report.uncatalogued_tables {
            tracing::warn!(table = %name, "Live table is not in the catalog");
        }
        tracing::info!(
            path = ?config.database_path,
            consistent = report.is_consistent(),
            "Opened funcbase"
        );
        Ok(service)
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    pub fn create_table(&self, spec: &CreateTableSpec) -> Result<()> {
        self.tables.create(spec)
    }

    pub fn rename_table(&self, old: &str, new: &str) -> Result<()> {
        self.tables.rename(old, new)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables.drop_table(name)
    }

    /// Describe a table, restricted to the named descriptor attributes
    ///
    /// An empty `fields` returns every attribute.
    pub fn describe_table<S: AsRef<str>>(&self, name: &str, fields: &[S]) -> Result<TableInfo> {
        let fields = fields
            .iter()
            .map(|f| f.as_ref().parse::<DescriptorField>().map_err(Error::validation))
            .collect::<Result<Vec<_>>>()?;
        self.tables.describe(name, &fields)
    }

    /// Live columns of a table
    ///
    /// Only admins may include the `password` column of an auth table.
    pub fn list_columns(
        &self,
        name: &str,
        include_auth: bool,
        caller: &Caller,
    ) -> Result<Arc<Vec<ColumnDescriptor>>> {
        if include_auth && !caller.is_admin() {
            return Err(Error::authorization(format!(
                "credential columns of '{name}' require admin privilege"
            )));
        }
        self.tables.list_columns(name, include_auth)
    }

    pub fn list_indexes(&self, name: &str) -> Result<Vec<String>> {
        self.tables.list_indexes(name)
    }

    pub fn create_index(&self, table: &str, index: &IndexSpec) -> Result<()> {
        self.tables.create_index(table, index)
    }

    pub fn drop_indexes<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.tables.drop_indexes(names)
    }

    pub fn update_rules(&self, table: &str, rules: &AccessRules) -> Result<()> {
        self.tables.update_rules(table, rules)
    }

    pub fn list_tables(&self, search: Option<&str>) -> Result<Vec<TableSummary>> {
        self.tables.list_tables(search)
    }

    pub fn reconcile(&self) -> Result<Reconciliation> {
        self.tables.reconcile()
    }

    /// Filtered, sorted and paged rows of a user table
    pub fn fetch_rows(&self, table: &str, query: &RowQuery, caller: &Caller) -> Result<RowPage> {
        self.rows.fetch_rows(table, query, caller)
    }

    pub fn fetch_row(&self, table: &str, id: &str) -> Result<Option<Record>> {
        self.rows.fetch_row(table, id)
    }

    /// Insert a row, returning its generated id
    pub fn insert_row(
        &self,
        table: &str,
        values: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<String> {
        self.rows.insert_row(table, values, caller)
    }

    pub fn update_row(
        &self,
        table: &str,
        id: &str,
        values: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<bool> {
        self.rows.update_row(table, id, values, caller)
    }

    pub fn delete_rows<S: AsRef<str>>(&self, table: &str, ids: &[S]) -> Result<usize> {
        self.rows.delete_rows(table, ids)
    }

    /// Run an ad-hoc step list in one transaction
    pub fn run_function(
        &self,
        steps: &[FunctionStep],
        input: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<Outputs> {
        self.interpreter.run(steps, input, caller)
    }

    pub fn save_function(&self, name: &str, steps: &[FunctionStep]) -> Result<()> {
        self.functions.save(name, steps)
    }

    pub fn list_functions(&self, search: Option<&str>) -> Result<Vec<String>> {
        self.functions.list(search)
    }

    pub fn get_function(&self, name: &str) -> Result<StoredFunction> {
        self.functions.get(name)
    }

    pub fn delete_function(&self, name: &str) -> Result<()> {
        self.functions.delete(name)
    }

    /// Run a stored function by name
    pub fn run_stored(
        &self,
        name: &str,
        input: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<Outputs> {
        let function = self.functions.get(name)?;
        tracing::debug!(function = %name, "Running stored function");
        self.interpreter.run(&function.steps, input, caller)
    }
}
