//! DDL generator
//!
//! Turns a table creation request into an ordered, deterministic list of
//! statements: CREATE TABLE, one CREATE INDEX per requested index, and the
//! trigger that refreshes `updated_at` on row update.
//!
//! Column order is fixed: synthetic `id`, reserved auth columns (auth tables
//! only), user fields in input order, the two timestamps, table-level UNIQUE
//! constraints, then FOREIGN KEY clauses.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::IndexSpec;
use crate::error::{Error, Result};

/// Synthetic primary key column present on every table
pub const ID_COLUMN: &str = "id";
/// Creation timestamp column
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Update timestamp column, refreshed by trigger
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Reserved columns of auth tables
pub const AUTH_COLUMNS: [&str; 3] = ["email", "password", "salt"];
/// Auth columns never shown to anyone
pub const SALT_COLUMN: &str = "salt";
/// Auth column shown only on privileged request
pub const PASSWORD_COLUMN: &str = "password";

/// Logical type reported for foreign-key columns
pub const RELATION_TYPE: &str = "RELATION";

/// Logical field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Datetime,
    File,
    Relation,
}

impl FieldType {
    /// Parse a logical type name (case-insensitive)
    ///
    /// Returns `None` for unsupported types.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "text" | "string" => Some(FieldType::Text),
            "number" | "real" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "datetime" | "timestamp" => Some(FieldType::Datetime),
            "file" | "blob" => Some(FieldType::File),
            "relation" => Some(FieldType::Relation),
            _ => None,
        }
    }

    /// Column type in generated DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text | FieldType::Relation => "TEXT",
            FieldType::Number => "REAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Datetime => "DATETIME",
            FieldType::File => "BLOB",
        }
    }
}

/// A column requested at table creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Logical type name as supplied by the caller
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    /// Target table, required for relation fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            nullable: false,
            unique: false,
            reference: None,
        }
    }

    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    #[must_use]
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn reference(mut self, table: impl Into<String>) -> Self {
        self.reference = Some(table.into());
        self
    }
}

/// Kind of table to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    #[default]
    Plain,
    /// Auth table carrying `email`, `password` and `salt`
    Users,
}

/// A table creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableSpec {
    #[serde(rename = "table_name", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(rename = "table_type", alias = "type", default)]
    pub kind: TableKind,
}

impl CreateTableSpec {
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            kind,
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Tables referenced by relation fields, in field order
    pub fn references(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| FieldType::parse(&f.field_type) == Some(FieldType::Relation))
            .filter_map(|f| f.reference.as_deref())
            .collect()
    }
}

/// What a generated statement creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Table,
    Index { name: String },
    /// Created only when no trigger of that name exists
    Trigger { name: String },
}

/// A single generated DDL statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub kind: StatementKind,
    pub sql: String,
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Check that `name` is usable as a table, column or index identifier
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid {what} name '{name}'")))
    }
}

/// Double-quote an already validated identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the `updated_at` trigger for a table
pub fn trigger_name(table: &str) -> String {
    format!("updated_timestamp_{table}")
}

/// Columns every table of the given kind carries besides user fields
pub fn synthetic_columns(kind: TableKind) -> Vec<&'static str> {
    let mut cols = vec![ID_COLUMN];
    if kind == TableKind::Users {
        cols.extend(AUTH_COLUMNS);
    }
    cols.push(CREATED_AT_COLUMN);
    cols.push(UPDATED_AT_COLUMN);
    cols
}

/// DDL generator
#[derive(Debug, Clone, Default)]
pub struct DdlGenerator {
    /// Reject unsupported field types instead of dropping them
    strict_field_types: bool,
}

impl DdlGenerator {
    pub fn new(strict_field_types: bool) -> Self {
        Self { strict_field_types }
    }

    /// Generate every statement needed to create a table
    pub fn create_table(&self, spec: &CreateTableSpec) -> Result<Vec<DdlStatement>> {
        validate_identifier("table", &spec.name)?;
        let table = quote_ident(&spec.name);

        // Column names are case-insensitive in the engine
        let mut reserved: HashSet<String> = synthetic_columns(spec.kind)
            .into_iter()
            .map(str::to_ascii_lowercase)
            .collect();
        let mut columns = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(ID_COLUMN))];
        if spec.kind == TableKind::Users {
            for col in AUTH_COLUMNS {
                columns.push(format!("{} TEXT NOT NULL", quote_ident(col)));
            }
        }

        let mut uniques = Vec::new();
        let mut foreign_keys = Vec::new();
        for field in &spec.fields {
            validate_identifier("column", &field.name)?;
            if !reserved.insert(field.name.to_ascii_lowercase()) {
                return Err(Error::validation(format!(
                    "column '{}' is reserved or duplicated",
                    field.name
                )));
            }

            let Some(field_type) = FieldType::parse(&field.field_type) else {
                if self.strict_field_types {
                    return Err(Error::validation(format!(
                        "unsupported type '{}' for column '{}'",
                        field.field_type, field.name
                    )));
                }
                tracing::warn!(
                    table = %spec.name,
                    column = %field.name,
                    field_type = %field.field_type,
                    "Dropping column with unsupported type"
                );
                continue;
            };

            let column = quote_ident(&field.name);
            let mut def = format!("{} {}", column, field_type.sql_type());
            if !field.nullable {
                def.push_str(" NOT NULL");
            }
            columns.push(def);

            if field.unique {
                uniques.push(format!("UNIQUE ({column})"));
            }

            if field_type == FieldType::Relation {
                let target = match field.reference.as_deref() {
                    Some(t) if !t.is_empty() => t,
                    _ => {
                        return Err(Error::validation(format!(
                            "relation column '{}' has no reference",
                            field.name
                        )))
                    }
                };
                validate_identifier("table", target)?;
                // No ON DELETE action: deleting a referenced row is refused
                foreign_keys.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {}({}) ON UPDATE CASCADE",
                    column,
                    quote_ident(target),
                    quote_ident(ID_COLUMN)
                ));
            }
        }

        columns.push(format!(
            "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
            quote_ident(CREATED_AT_COLUMN)
        ));
        columns.push(format!(
            "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
            quote_ident(UPDATED_AT_COLUMN)
        ));
        columns.extend(uniques);
        columns.extend(foreign_keys);

        let mut statements = vec![DdlStatement {
            kind: StatementKind::Table,
            sql: format!("CREATE TABLE {} ({})", table, columns.join(", ")),
        }];
        for index in &spec.indexes {
            statements.push(self.create_index(&spec.name, index)?);
        }
        statements.push(self.create_trigger(&spec.name)?);

        for stmt in &statements {
            tracing::debug!(table = %spec.name, sql = %stmt.sql, "Generated DDL");
        }
        Ok(statements)
    }

    /// CREATE INDEX for one index spec
    pub fn create_index(&self, table: &str, index: &IndexSpec) -> Result<DdlStatement> {
        validate_identifier("table", table)?;
        validate_identifier("index", &index.name)?;
        if index.columns.is_empty() {
            return Err(Error::validation(format!(
                "index '{}' has no columns",
                index.name
            )));
        }
        let mut cols = Vec::with_capacity(index.columns.len());
        for col in &index.columns {
            validate_identifier("column", col)?;
            cols.push(quote_ident(col));
        }
        Ok(DdlStatement {
            kind: StatementKind::Index {
                name: index.name.clone(),
            },
            sql: format!(
                "CREATE INDEX {} ON {} ({})",
                quote_ident(&index.name),
                quote_ident(table),
                cols.join(", ")
            ),
        })
    }

    /// Trigger that refreshes `updated_at` after every row update
    pub fn create_trigger(&self, table: &str) -> Result<DdlStatement> {
        validate_identifier("table", table)?;
        let name = trigger_name(table);
        let t = quote_ident(table);
        Ok(DdlStatement {
            sql: format!(
                "CREATE TRIGGER {} AFTER UPDATE ON {t} FOR EACH ROW BEGIN \
                 UPDATE {t} SET {} = CURRENT_TIMESTAMP WHERE {} = OLD.{}; END",
                quote_ident(&name),
                quote_ident(UPDATED_AT_COLUMN),
                quote_ident(ID_COLUMN),
                quote_ident(ID_COLUMN),
            ),
            kind: StatementKind::Trigger { name },
        })
    }

    pub fn drop_trigger(&self, table: &str) -> Result<String> {
        validate_identifier("table", table)?;
        Ok(format!(
            "DROP TRIGGER IF EXISTS {}",
            quote_ident(&trigger_name(table))
        ))
    }

    pub fn rename_table(&self, old: &str, new: &str) -> Result<String> {
        validate_identifier("table", old)?;
        validate_identifier("table", new)?;
        Ok(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(old),
            quote_ident(new)
        ))
    }

    pub fn drop_table(&self, table: &str) -> Result<String> {
        validate_identifier("table", table)?;
        Ok(format!("DROP TABLE {}", quote_ident(table)))
    }

    /// Absence of the index is not an error
    pub fn drop_index(&self, name: &str) -> Result<String> {
        validate_identifier("index", name)?;
        Ok(format!("DROP INDEX IF EXISTS {}", quote_ident(name)))
    }
}
