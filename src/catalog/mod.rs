//! Catalog - descriptors of user-defined tables
//!
//! Each table created through the table manager has one descriptor row in the
//! `_table` system table: its auth/system flags, the indexes requested at
//! creation, and five access rule strings. Descriptor attributes are read and
//! written through a fixed table of typed accessors, one per attribute.

pub mod system_tables;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Datum;

/// Rule value meaning only admins may perform the operation
pub const ADMIN_ONLY: &str = "ADMIN_ONLY";

/// Catalog and schema errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Table already exists
    #[error("table '{0}' already exists")]
    TableExists(String),

    /// Table not found
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// Operation not permitted on a system table
    #[error("table '{0}' is a system table")]
    SystemTable(String),

    /// Stored function already exists
    #[error("function '{0}' already exists")]
    FunctionExists(String),

    /// Stored function not found
    #[error("function '{0}' not found")]
    FunctionNotFound(String),

    /// A descriptor row that cannot be decoded
    #[error("corrupt descriptor for '{table}': {reason}")]
    CorruptDescriptor { table: String, reason: String },
}

/// Result type for catalog operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// A named index over one or more columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name
    pub name: String,
    /// Indexed columns, in order
    #[serde(rename = "indexes", alias = "columns")]
    pub columns: Vec<String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Per-operation access rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRules {
    pub view_rule: String,
    pub read_rule: String,
    pub insert_rule: String,
    pub update_rule: String,
    pub delete_rule: String,
}

impl Default for AccessRules {
    fn default() -> Self {
        Self {
            view_rule: ADMIN_ONLY.to_string(),
            read_rule: ADMIN_ONLY.to_string(),
            insert_rule: ADMIN_ONLY.to_string(),
            update_rule: ADMIN_ONLY.to_string(),
            delete_rule: ADMIN_ONLY.to_string(),
        }
    }
}

/// Full descriptor of a catalogued table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    /// Table name (unique)
    pub name: String,
    /// Whether the table holds user credentials
    pub auth: bool,
    /// Whether the table belongs to the system
    pub system: bool,
    /// Indexes requested for the table
    pub indexes: Vec<IndexSpec>,
    /// Access rules
    pub rules: AccessRules,
}

impl TableDescriptor {
    /// Create a descriptor for a new user table with default rules
    pub fn new(name: impl Into<String>, auth: bool) -> Self {
        Self {
            name: name.into(),
            auth,
            system: false,
            indexes: Vec::new(),
            rules: AccessRules::default(),
        }
    }

    /// Mark as a system table
    #[must_use]
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Add an index
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// A descriptor restricted to the attributes a caller asked for
///
/// Attributes that were not requested stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<IndexSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_rule: Option<String>,
}

impl TableInfo {
    /// Whether the table is an auth table (false when not requested)
    pub fn is_auth(&self) -> bool {
        self.auth.unwrap_or(false)
    }

    /// Whether the table is a system table (false when not requested)
    pub fn is_system(&self) -> bool {
        self.system.unwrap_or(false)
    }
}

/// A descriptor attribute that can be requested from `describe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorField {
    Name,
    Auth,
    System,
    Indexes,
    ViewRule,
    ReadRule,
    InsertRule,
    UpdateRule,
    DeleteRule,
}

/// Typed accessor/mutator pair for one descriptor attribute
pub struct FieldAccessor {
    /// Attribute this accessor serves
    pub field: DescriptorField,
    /// Column in the `_table` system table
    pub column: &'static str,
    /// Read the attribute from a full descriptor as a storable datum
    pub get: fn(&TableDescriptor) -> SchemaResult<Datum>,
    /// Write a stored datum into a partial descriptor
    pub set: fn(&mut TableInfo, &str, &Datum) -> SchemaResult<()>,
}

fn corrupt(table: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::CorruptDescriptor {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn text_of(table: &str, column: &str, value: &Datum) -> SchemaResult<String> {
    match value {
        Datum::Text(s) => Ok(s.clone()),
        other => Err(corrupt(table, format!("{column} is {other:?}, expected text"))),
    }
}

fn flag_of(table: &str, column: &str, value: &Datum) -> SchemaResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| corrupt(table, format!("{column} is {value:?}, expected boolean")))
}

fn indexes_of(table: &str, value: &Datum) -> SchemaResult<Vec<IndexSpec>> {
    match value {
        Datum::Null => Ok(Vec::new()),
        Datum::Text(s) if s.is_empty() => Ok(Vec::new()),
        Datum::Text(s) => serde_json::from_str(s).map_err(|e| corrupt(table, e.to_string())),
        other => Err(corrupt(table, format!("indexes is {other:?}, expected JSON text"))),
    }
}

/// Accessor table, indexed by `DescriptorField as usize`
static ACCESSORS: [FieldAccessor; 9] = [
    FieldAccessor {
        field: DescriptorField::Name,
        column: "name",
        get: |d| Ok(Datum::Text(d.name.clone())),
        set: |info, table, v| {
            info.name = Some(text_of(table, "name", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::Auth,
        column: "auth",
        get: |d| Ok(Datum::Bool(d.auth)),
        set: |info, table, v| {
            info.auth = Some(flag_of(table, "auth", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::System,
        column: "system",
        get: |d| Ok(Datum::Bool(d.system)),
        set: |info, table, v| {
            info.system = Some(flag_of(table, "system", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::Indexes,
        column: "indexes",
        get: |d| {
            serde_json::to_string(&d.indexes)
                .map(Datum::Text)
                .map_err(|e| corrupt(&d.name, e.to_string()))
        },
        set: |info, table, v| {
            info.indexes = Some(indexes_of(table, v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::ViewRule,
        column: "view_rule",
        get: |d| Ok(Datum::Text(d.rules.view_rule.clone())),
        set: |info, table, v| {
            info.view_rule = Some(text_of(table, "view_rule", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::ReadRule,
        column: "read_rule",
        get: |d| Ok(Datum::Text(d.rules.read_rule.clone())),
        set: |info, table, v| {
            info.read_rule = Some(text_of(table, "read_rule", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::InsertRule,
        column: "insert_rule",
        get: |d| Ok(Datum::Text(d.rules.insert_rule.clone())),
        set: |info, table, v| {
            info.insert_rule = Some(text_of(table, "insert_rule", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::UpdateRule,
        column: "update_rule",
        get: |d| Ok(Datum::Text(d.rules.update_rule.clone())),
        set: |info, table, v| {
            info.update_rule = Some(text_of(table, "update_rule", v)?);
            Ok(())
        },
    },
    FieldAccessor {
        field: DescriptorField::DeleteRule,
        column: "delete_rule",
        get: |d| Ok(Datum::Text(d.rules.delete_rule.clone())),
        set: |info, table, v| {
            info.delete_rule = Some(text_of(table, "delete_rule", v)?);
            Ok(())
        },
    },
];

impl DescriptorField {
    /// Every attribute, in catalog column order (the default `describe` set)
    pub const ALL: [DescriptorField; 9] = [
        DescriptorField::Name,
        DescriptorField::Auth,
        DescriptorField::System,
        DescriptorField::Indexes,
        DescriptorField::ViewRule,
        DescriptorField::ReadRule,
        DescriptorField::InsertRule,
        DescriptorField::UpdateRule,
        DescriptorField::DeleteRule,
    ];

    /// The accessor pair for this attribute
    pub fn accessor(self) -> &'static FieldAccessor {
        &ACCESSORS[self as usize]
    }

    /// Column name in the `_table` system table (also the wire name)
    pub fn column(self) -> &'static str {
        self.accessor().column
    }
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for DescriptorField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DescriptorField::ALL
            .iter()
            .copied()
            .find(|f| f.column() == s)
            .ok_or_else(|| format!("unknown descriptor field '{s}'"))
    }
}
