//! Funcbase - runtime schema manager and declarative function interpreter
//!
//! Features:
//! - Tables created, renamed and dropped at runtime, with a persisted catalog
//! - JSON condition trees compiled to parameterised SQL predicates
//! - Filtered, paged row access by table and id
//! - Multi-step insert/update/delete/fetch functions run as one transaction

pub mod caller;
pub mod catalog;
pub mod config;
pub mod ddl;
pub mod error;
pub mod filter;
pub mod function;
pub mod id;
pub mod rows;
pub mod service;
pub mod storage;
pub mod table;

pub use caller::Caller;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use service::Funcbase;
