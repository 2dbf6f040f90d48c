//! Storage engine subsystem
//!
//! The schema manager and function interpreter only talk to storage through
//! the `StorageEngine` / `Transaction` traits; `SqliteEngine` is the shipped
//! implementation.

pub mod datum;
pub mod error;
pub mod record;
pub mod sqlite;
pub mod traits;

pub use datum::Datum;
pub use error::{StorageError, StorageResult};
pub use record::Record;
pub use sqlite::{SqliteConfig, SqliteEngine};
pub use traits::{ColumnInfo, ObjectKind, StorageEngine, Transaction};
