//! Declarative functions
//!
//! A function is an ordered list of steps, each inserting, updating,
//! deleting or fetching rows of one table. Step values are templates bound
//! against the caller's input, the caller's identity, and the outputs of
//! earlier steps:
//!
//! ```json
//! [
//!   {"name": "task", "action": "insert", "table": "tasks",
//!    "values": {"title": "title", "owner": "$user.id"}},
//!   {"action": "insert", "table": "comments",
//!    "values": {"task": "$task", "body": "body"}}
//! ]
//! ```

pub mod env;
pub mod interpreter;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ddl::{validate_identifier, ID_COLUMN};
use crate::error::{Error, Result};
use crate::filter::{FilterNode, FilterTriple};
use crate::storage::Datum;

pub use env::{Binding, ExecutionEnvironment};
pub use interpreter::Interpreter;
pub use store::{FunctionStore, StoredFunction};

/// Binding token for the caller's identity
pub const USER_ID_TOKEN: &str = "$user.id";

/// Step action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
    Fetch,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Fetch => "fetch",
        }
    }
}

/// Whether a step acts on one record or a list of records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Multiple,
}

/// Filter of an update or delete step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepFilter {
    /// `[{column, operator, value}]`, values may fall back to caller input
    Triples(Vec<FilterTriple>),
    /// Condition tree
    Tree(Value),
}

/// One step of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStep {
    /// Output name, also the key of this step's caller input
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub action: Action,
    pub table: String,
    #[serde(default)]
    pub multiple: bool,
    /// Column templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<StepFilter>,
    /// Columns to fetch; empty selects every visible column
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Allow an update or delete without any condition
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all_rows: bool,
}

impl FunctionStep {
    pub fn new(action: Action, table: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            action,
            table: table.into(),
            multiple: false,
            values: BTreeMap::new(),
            filter: None,
            columns: Vec::new(),
            all_rows: false,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    #[must_use]
    pub fn value(mut self, column: impl Into<String>, template: impl Into<Value>) -> Self {
        self.values.insert(column.into(), template.into());
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: StepFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    pub fn cardinality(&self) -> Cardinality {
        if self.multiple {
            Cardinality::Multiple
        } else {
            Cardinality::Singular
        }
    }

    /// Output name, if the step records one
    pub fn output_name(&self) -> Option<&str> {
        (!self.name.is_empty()).then_some(self.name.as_str())
    }

    /// Parsed column templates, in column order
    pub fn templates(&self) -> Result<Vec<(&str, TemplateValue)>> {
        let mut templates = Vec::with_capacity(self.values.len());
        for (column, value) in &self.values {
            templates.push((column.as_str(), TemplateValue::parse(column, value)?));
        }
        Ok(templates)
    }

    /// Check the step's shape without touching storage
    pub fn validate(&self) -> Result<()> {
        validate_identifier("table", &self.table)?;
        for column in self.values.keys().chain(self.columns.iter()) {
            if column != "*" {
                validate_identifier("column", column)?;
            }
        }
        self.templates()?;

        match self.action {
            Action::Insert => {
                if self.values.contains_key(ID_COLUMN) {
                    return Err(Error::validation(format!(
                        "step '{}': inserted ids are generated",
                        self.name
                    )));
                }
            }
            Action::Update => {
                if self.values.is_empty() {
                    return Err(Error::validation(format!(
                        "step '{}': update without values",
                        self.name
                    )));
                }
            }
            Action::Delete => {}
            Action::Fetch => {
                if self.filter.is_some() || !self.values.is_empty() {
                    return Err(Error::validation(format!(
                        "step '{}': fetch takes only columns",
                        self.name
                    )));
                }
            }
        }

        match &self.filter {
            Some(StepFilter::Tree(tree)) => {
                FilterNode::from_json(tree)?;
            }
            Some(StepFilter::Triples(triples)) => {
                FilterNode::from_triples(triples, |_| Ok(Datum::Null))?;
            }
            None => {}
        }
        Ok(())
    }
}

/// Parse and validate a JSON step list
pub fn parse_steps(value: &Value) -> Result<Vec<FunctionStep>> {
    let steps: Vec<FunctionStep> = serde_json::from_value(value.clone())
        .map_err(|e| Error::validation(format!("malformed function: {e}")))?;
    for step in &steps {
        step.validate()?;
    }
    Ok(steps)
}

/// A column template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// `$user.id`: the caller's identity
    UserId,
    /// `$name`: an earlier step's output
    Reference(String),
    /// Any other string: the caller's input under the column name
    Input,
    /// A non-string literal, used as is
    Literal(Datum),
}

impl TemplateValue {
    pub fn parse(column: &str, value: &Value) -> Result<Self> {
        let template = match value {
            Value::String(s) => Self::parse_str(s).unwrap_or(TemplateValue::Input),
            other => Datum::from_json(other)
                .map(TemplateValue::Literal)
                .ok_or_else(|| {
                    Error::validation(format!("template for '{column}' must be a scalar"))
                })?,
        };
        match template {
            TemplateValue::Reference(name) if name.is_empty() => Err(Error::validation(format!(
                "template for '{column}' names no binding"
            ))),
            t => Ok(t),
        }
    }

    /// Parse a `$` token; `None` when `s` is not one
    pub fn parse_str(s: &str) -> Option<Self> {
        if s == USER_ID_TOKEN {
            Some(TemplateValue::UserId)
        } else {
            s.strip_prefix('$')
                .map(|name| TemplateValue::Reference(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_template_parse() {
        assert_eq!(
            TemplateValue::parse("a", &json!("$user.id")).unwrap(),
            TemplateValue::UserId
        );
        assert_eq!(
            TemplateValue::parse("a", &json!("$order")).unwrap(),
            TemplateValue::Reference("order".into())
        );
        assert_eq!(
            TemplateValue::parse("a", &json!("anything")).unwrap(),
            TemplateValue::Input
        );
        assert_eq!(
            TemplateValue::parse("a", &json!(3)).unwrap(),
            TemplateValue::Literal(Datum::Int(3))
        );
        assert!(TemplateValue::parse("a", &json!("$")).is_err());
        assert!(TemplateValue::parse("a", &json!({"x": 1})).is_err());
    }

    #[test]
    fn test_step_wire_format() {
        let steps = parse_steps(&json!([
            {"name": "order", "action": "insert", "table": "orders",
             "values": {"customer": "$user.id", "total": "total"}},
            {"name": "items", "action": "insert", "table": "items", "multiple": true,
             "values": {"order": "$order", "sku": "sku"}},
            {"name": "close", "action": "update", "table": "orders",
             "values": {"status": "status"},
             "filter": {"and": [{"status": "open"}, {"total>": 10}]}},
            {"name": "purge", "action": "delete", "table": "items",
             "filter": [{"column": "sku", "operator": "="}]},
            {"name": "all", "action": "fetch", "table": "orders", "columns": ["id", "total"]}
        ]))
        .unwrap();

        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].cardinality(), Cardinality::Singular);
        assert_eq!(steps[1].cardinality(), Cardinality::Multiple);
        assert!(matches!(steps[2].filter, Some(StepFilter::Tree(_))));
        assert!(matches!(steps[3].filter, Some(StepFilter::Triples(ref t)) if t.len() == 1));
        assert_eq!(steps[4].columns, vec!["id", "total"]);
        assert_eq!(steps[4].output_name(), Some("all"));
    }

    #[test]
    fn test_step_round_trips_through_json() {
        let step = FunctionStep::new(Action::Update, "tasks")
            .named("done")
            .value("done", true)
            .all_rows();
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["action"], "update");
        assert_eq!(json["all_rows"], true);
        let back: FunctionStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_validate_rejects_bad_steps() {
        let cases = [
            json!([{"action": "insert", "table": "bad table"}]),
            json!([{"action": "insert", "table": "t", "values": {"id": "id"}}]),
            json!([{"action": "update", "table": "t"}]),
            json!([{"action": "fetch", "table": "t", "filter": {"a": 1}}]),
            json!([{"action": "delete", "table": "t", "filter": [{"column": "a", "operator": "~"}]}]),
            json!([{"action": "upsert", "table": "t"}]),
            json!({"action": "insert"}),
        ];
        for case in cases {
            let err = parse_steps(&case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{case}");
        }
    }
}
