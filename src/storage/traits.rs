//! Storage engine trait definition

use crate::storage::datum::Datum;
use crate::storage::error::StorageResult;
use crate::storage::record::Record;

/// Kind of schema object tracked by the engine's master table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
    Trigger,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }
}

/// Live column metadata as reported by schema introspection
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Ordinal position
    pub cid: i64,
    /// Column name
    pub name: String,
    /// Declared type (e.g. `TEXT`, `REAL`)
    pub data_type: String,
    /// Whether the column carries NOT NULL
    pub not_null: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Default value expression
    pub default: Option<String>,
    /// Referenced table when the column is a foreign key
    pub reference: Option<String>,
}

/// A unit of work against the engine
///
/// Write transactions are exclusive; read transactions see one consistent
/// snapshot. Dropping a transaction without calling `commit` rolls it back.
pub trait Transaction {
    /// Execute a statement, returning the number of affected rows
    fn execute(&self, sql: &str, params: &[Datum]) -> StorageResult<usize>;

    /// Run a query and collect every result row
    fn query(&self, sql: &str, params: &[Datum]) -> StorageResult<Vec<Record>>;

    /// Introspect the live columns of a table, including foreign-key targets
    ///
    /// Returns an empty list when the table does not exist.
    fn columns(&self, table: &str) -> StorageResult<Vec<ColumnInfo>>;

    /// Check whether a named schema object exists
    fn object_exists(&self, kind: ObjectKind, name: &str) -> StorageResult<bool>;

    /// Names of the user-created indexes on a table
    fn indexes(&self, table: &str) -> StorageResult<Vec<String>>;

    /// Names of all live tables, excluding engine-internal ones
    fn tables(&self) -> StorageResult<Vec<String>>;

    /// Make the transaction's effects durable
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Abstract transactional storage engine
pub trait StorageEngine: Send + Sync {
    /// Begin an exclusive write transaction
    ///
    /// Blocks until every other write transaction has finished.
    fn begin_write(&self) -> StorageResult<Box<dyn Transaction + '_>>;

    /// Begin a read-only transaction over a consistent snapshot
    fn begin_read(&self) -> StorageResult<Box<dyn Transaction + '_>>;
}
