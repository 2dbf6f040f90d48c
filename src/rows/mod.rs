//! Row data access
//!
//! Reads and writes user table rows outside of functions: filtered, sorted
//! and paged listings, fetch/insert/update by id, and batch delete by id.
//!
//! Credentials of auth tables are never returned or written here, and new
//! rows of auth tables come only from the auth layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::caller::Caller;
use crate::catalog::system_tables::is_system_table;
use crate::catalog::{DescriptorField, SchemaError};
use crate::ddl::{quote_ident, validate_identifier, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::error::{Error, Result};
use crate::filter::FilterNode;
use crate::function::{ExecutionEnvironment, USER_ID_TOKEN};
use crate::id::IdGenerator;
use crate::storage::{Datum, Record, StorageEngine, Transaction};
use crate::table::{redacted_columns, TableManager};

/// Columns the engine maintains itself
const MANAGED_COLUMNS: [&str; 3] = [ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Parameters of a row listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    /// Condition tree; `null` matches every row
    #[serde(default)]
    pub filter: Value,
    /// Comma-separated sort columns, `-` prefix for descending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// 1-based page number
    #[serde(default)]
    pub page: u32,
    /// Rows per page; with `page`, 0 disables paging
    #[serde(default)]
    pub page_size: u32,
}

impl RowQuery {
    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn limit_clause(&self) -> Option<String> {
        if self.page == 0 || self.page_size == 0 {
            return None;
        }
        let offset = u64::from(self.page - 1) * u64::from(self.page_size);
        Some(format!(" LIMIT {} OFFSET {offset}", self.page_size))
    }
}

/// One page of a row listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPage {
    pub data: Vec<Record>,
    pub page: u32,
    pub page_size: u32,
    /// Rows matching the filter across all pages
    #[serde(rename = "total_data")]
    pub total: i64,
}

/// Live shape of a user table inside one transaction
struct TableView<'a> {
    name: &'a str,
    auth: bool,
    columns: Vec<String>,
    hidden: &'static [&'static str],
}

impl TableView<'_> {
    fn is_hidden(&self, column: &str) -> bool {
        self.hidden.iter().any(|h| h.eq_ignore_ascii_case(column))
    }

    /// Fail unless `column` exists and may be read or written
    fn check_column(&self, column: &str) -> Result<()> {
        if self.is_hidden(column) {
            return Err(Error::authorization(format!(
                "column '{column}' of '{}' is not accessible",
                self.name
            )));
        }
        if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Err(Error::validation(format!(
                "unknown column '{column}' in '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn select_list(&self) -> String {
        self.columns
            .iter()
            .filter(|c| !self.is_hidden(c))
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn order_by(&self, sort: Option<&str>) -> Result<String> {
        let mut terms = Vec::new();
        let requested = sort.unwrap_or_default().split(',').map(str::trim);
        for term in requested.filter(|t| !t.is_empty()) {
            let (column, direction) = match term.strip_prefix('-') {
                Some(column) => (column.trim(), "DESC"),
                None => (term.strip_prefix('+').unwrap_or(term).trim(), "ASC"),
            };
            validate_identifier("column", column)?;
            self.check_column(column)?;
            terms.push(format!("{} {direction}", quote_ident(column)));
        }
        // Insertion order breaks ties so pages never overlap
        terms.push("rowid ASC".to_string());
        Ok(terms.join(", "))
    }

    /// Bind caller-supplied values to writable columns
    ///
    /// Managed columns and empty strings are skipped. `$user.id` binds the
    /// caller's id.
    fn assignments(
        &self,
        values: &Map<String, Value>,
        env: &ExecutionEnvironment,
    ) -> Result<Vec<(String, Datum)>> {
        let mut row = Vec::with_capacity(values.len());
        for (column, value) in values {
            if MANAGED_COLUMNS.iter().any(|m| m.eq_ignore_ascii_case(column)) {
                continue;
            }
            let datum = match value {
                Value::String(s) if s.is_empty() => continue,
                Value::String(s) if s == USER_ID_TOKEN => env.user_id()?,
                other => Datum::from_json(other).ok_or_else(|| {
                    Error::validation(format!("value for '{column}' must be a scalar"))
                })?,
            };
            validate_identifier("column", column)?;
            self.check_column(column)?;
            row.push((column.clone(), datum));
        }
        Ok(row)
    }
}

/// Row data access over user tables
pub struct RowStore {
    engine: Arc<dyn StorageEngine>,
    tables: Arc<TableManager>,
    ids: Arc<dyn IdGenerator>,
}

impl RowStore {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        tables: Arc<TableManager>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            engine,
            tables,
            ids,
        }
    }

    fn view<'a>(&self, tx: &dyn Transaction, table: &'a str) -> Result<TableView<'a>> {
        if is_system_table(table) {
            return Err(SchemaError::SystemTable(table.to_string()).into());
        }
        let info = self
            .tables
            .describe_in(tx, table, &[DescriptorField::Auth])?;
        let columns = tx.columns(table)?.into_iter().map(|c| c.name).collect();
        let auth = info.is_auth();
        Ok(TableView {
            name: table,
            auth,
            columns,
            hidden: if auth { redacted_columns(false) } else { &[] },
        })
    }

    /// Filtered, sorted and paged rows of a table
    ///
    /// `$user.id` in filter values binds the caller's id. The total counts
    /// every matching row, not only the returned page.
    pub fn fetch_rows(&self, table: &str, query: &RowQuery, caller: &Caller) -> Result<RowPage> {
        let tx = self.engine.begin_read()?;
        let view = self.view(tx.as_ref(), table)?;

        let node = FilterNode::from_json(&query.filter)?;
        for column in node.columns() {
            view.check_column(column)?;
        }
        let env = ExecutionEnvironment::new(caller.user_id());
        let predicate = node
            .try_map_values(&mut |v: Datum| env.resolve_filter_value(v))?
            .compile();
        let order = view.order_by(query.sort.as_deref())?;

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {order}",
            view.select_list(),
            quote_ident(table),
            predicate.sql
        );
        if let Some(limit) = query.limit_clause() {
            sql.push_str(&limit);
        }
        let data = tx.query(&sql, &predicate.params)?;

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM {} WHERE {}",
            quote_ident(table),
            predicate.sql
        );
        let total = tx
            .query(&count_sql, &predicate.params)?
            .first()
            .and_then(|r| r.get("total"))
            .and_then(Datum::as_int)
            .unwrap_or(0);

        tracing::debug!(table = %table, rows = data.len(), total, "Fetched rows");
        Ok(RowPage {
            data,
            page: query.page,
            page_size: query.page_size,
            total,
        })
    }

    /// The row with the given id, if any
    pub fn fetch_row(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let tx = self.engine.begin_read()?;
        let view = self.view(tx.as_ref(), table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            view.select_list(),
            quote_ident(table),
            quote_ident(ID_COLUMN)
        );
        Ok(tx.query(&sql, &[Datum::from(id)])?.into_iter().next())
    }

    /// Insert one row, returning its generated id
    pub fn insert_row(
        &self,
        table: &str,
        values: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<String> {
        let tx = self.engine.begin_write()?;
        let view = self.view(tx.as_ref(), table)?;
        if view.auth {
            return Err(Error::authorization(format!(
                "rows of auth table '{table}' are created by the auth layer"
            )));
        }
        let env = ExecutionEnvironment::new(caller.user_id());
        let row = view.assignments(values, &env)?;

        let id = self.ids.generate();
        let mut columns = vec![quote_ident(ID_COLUMN)];
        let mut params = vec![Datum::from(id.as_str())];
        for (column, value) in row {
            columns.push(quote_ident(&column));
            params.push(value);
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            vec!["?"; params.len()].join(", ")
        );
        tx.execute(&sql, &params)?;
        tx.commit()?;

        tracing::info!(table = %table, id = %id, "Inserted row");
        Ok(id)
    }

    /// Update the row with the given id
    ///
    /// Returns whether the row existed.
    pub fn update_row(
        &self,
        table: &str,
        id: &str,
        values: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<bool> {
        let tx = self.engine.begin_write()?;
        let view = self.view(tx.as_ref(), table)?;
        let env = ExecutionEnvironment::new(caller.user_id());
        let row = view.assignments(values, &env)?;
        if row.is_empty() {
            return Err(Error::validation(format!(
                "no writable values for row '{id}' of '{table}'"
            )));
        }

        let mut assignments = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len() + 1);
        for (column, value) in row {
            assignments.push(format!("{} = ?", quote_ident(&column)));
            params.push(value);
        }
        params.push(Datum::from(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table),
            assignments.join(", "),
            quote_ident(ID_COLUMN)
        );
        let n = tx.execute(&sql, &params)?;
        tx.commit()?;

        tracing::info!(table = %table, id = %id, found = n > 0, "Updated row");
        Ok(n > 0)
    }

    /// Delete rows by id, returning how many were removed
    pub fn delete_rows<S: AsRef<str>>(&self, table: &str, ids: &[S]) -> Result<usize> {
        let tx = self.engine.begin_write()?;
        self.view(tx.as_ref(), table)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let params: Vec<Datum> = ids.iter().map(|id| Datum::from(id.as_ref())).collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(table),
            quote_ident(ID_COLUMN),
            vec!["?"; params.len()].join(", ")
        );
        let n = tx.execute(&sql, &params)?;
        tx.commit()?;

        tracing::info!(table = %table, requested = ids.len(), deleted = n, "Deleted rows");
        Ok(n)
    }
}
