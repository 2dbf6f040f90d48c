//! Shared test utilities
//!
//! Note: clippy reports false-positive dead_code warnings because it can't
//! trace usage across test binaries. These utilities are used by multiple tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use funcbase::ddl::{CreateTableSpec, FieldSpec, TableKind};
use funcbase::id::IdGenerator;
use funcbase::storage::{Record, SqliteConfig, SqliteEngine, StorageEngine};
use funcbase::{Config, Funcbase};

/// Ids `id-1`, `id-2`, ... in insertion order
#[derive(Default)]
pub struct SequentialIds(Mutex<u64>);

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        let mut n = self.0.lock();
        *n += 1;
        format!("id-{}", *n)
    }
}

/// Service plus direct engine access for assertions
pub struct Harness {
    pub engine: Arc<dyn StorageEngine>,
    pub fb: Funcbase,
}

impl Harness {
    /// Private in-memory database with predictable ids
    pub fn in_memory() -> Self {
        let engine: Arc<dyn StorageEngine> = Arc::new(SqliteEngine::in_memory().unwrap());
        Self::with_engine(engine, &Config::default())
    }

    /// Database file at `path`
    pub fn file(path: &Path) -> Self {
        let config = Config {
            database_path: Some(path.to_path_buf()),
            ..Config::default()
        };
        let engine: Arc<dyn StorageEngine> =
            Arc::new(SqliteEngine::open(&SqliteConfig::file(path)).unwrap());
        Self::with_engine(engine, &config)
    }

    fn with_engine(engine: Arc<dyn StorageEngine>, config: &Config) -> Self {
        let fb = Funcbase::with_engine(
            Arc::clone(&engine),
            config,
            Arc::new(SequentialIds::default()),
        )
        .unwrap();
        Self { engine, fb }
    }

    /// Run a read-only query outside the service
    pub fn query(&self, sql: &str) -> Vec<Record> {
        let tx = self.engine.begin_read().unwrap();
        tx.query(sql, &[]).unwrap()
    }

    pub fn count(&self, table: &str) -> usize {
        self.query(&format!("SELECT id FROM \"{table}\"")).len()
    }
}

/// `tasks(title text not null)`
pub fn tasks_spec() -> CreateTableSpec {
    CreateTableSpec::new("tasks", TableKind::Plain)
        .field(FieldSpec::new("title", "text").nullable(false))
}

/// `orders(customer, status, total)` and `items(order -> orders, sku unique)`
pub fn create_order_tables(fb: &Funcbase) {
    fb.create_table(
        &CreateTableSpec::new("orders", TableKind::Plain)
            .field(FieldSpec::new("customer", "text").nullable(true))
            .field(FieldSpec::new("status", "text").nullable(true))
            .field(FieldSpec::new("total", "number").nullable(true)),
    )
    .unwrap();
    fb.create_table(
        &CreateTableSpec::new("items", TableKind::Plain)
            .field(
                FieldSpec::new("order", "relation")
                    .nullable(false)
                    .reference("orders"),
            )
            .field(FieldSpec::new("sku", "text").unique(true)),
    )
    .unwrap();
}

/// Unwrap a JSON object literal
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
