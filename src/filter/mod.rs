//! Filter compiler
//!
//! Parses declarative condition trees and compiles them into parameterised
//! SQL predicates usable in SELECT, UPDATE and DELETE statements.
//!
//! A condition map holds either logical keys (`"and"`, `"or"`) mapping to a
//! list of nested maps, or `"<column><operator>"` keys mapping to a literal:
//!
//! ```json
//! {"and": [{"status": "open"}, {"priority>": 1}]}
//! ```
//!
//! A key without an operator suffix compares for equality. Several keys in
//! one map are conjoined in key order. An empty tree matches every row.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ddl::{quote_ident, validate_identifier};
use crate::error::{Error, Result};
use crate::storage::Datum;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Key suffixes, longest first so `>=` wins over `>`
const SUFFIXES: [(&str, Operator); 7] = [
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    ("<>", Operator::Ne),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
];

impl Operator {
    /// Parse an operator token as used in filter triples
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "" | "=" | "==" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A node of a condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Comparison {
        column: String,
        op: Operator,
        value: Datum,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

/// `{column, operator, value}` condition as written in stored steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterTriple {
    pub column: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Split a `"<column><operator>"` key
fn split_key(key: &str) -> Result<(String, Operator)> {
    let (column, op) = SUFFIXES
        .iter()
        .find_map(|(suffix, op)| key.strip_suffix(suffix).map(|col| (col, *op)))
        .unwrap_or((key, Operator::Eq));
    let column = column.trim();
    validate_identifier("column", column)?;
    Ok((column.to_string(), op))
}

fn scalar(key: &str, value: &Value) -> Result<Datum> {
    Datum::from_json(value)
        .ok_or_else(|| Error::validation(format!("filter value for '{key}' must be a scalar")))
}

impl FilterNode {
    /// A tree matching every row
    pub fn all() -> Self {
        FilterNode::And(Vec::new())
    }

    pub fn comparison(column: impl Into<String>, op: Operator, value: impl Into<Datum>) -> Self {
        FilterNode::Comparison {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse a JSON condition map
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(FilterNode::all()),
            Value::Object(map) => map,
            _ => return Err(Error::validation("filter must be an object")),
        };

        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();

        let mut nodes = Vec::with_capacity(keys.len());
        for key in keys {
            let value = &map[key.as_str()];
            let logical = key.to_ascii_lowercase();
            if logical == "and" || logical == "or" {
                let Value::Array(items) = value else {
                    return Err(Error::validation(format!("'{key}' expects a list")));
                };
                let children = items
                    .iter()
                    .map(FilterNode::from_json)
                    .collect::<Result<Vec<_>>>()?;
                nodes.push(if logical == "and" {
                    FilterNode::And(children)
                } else {
                    FilterNode::Or(children)
                });
            } else {
                let (column, op) = split_key(key)?;
                nodes.push(FilterNode::Comparison {
                    column,
                    op,
                    value: scalar(key, value)?,
                });
            }
        }

        Ok(match nodes.len() {
            1 => nodes.remove(0),
            _ => FilterNode::And(nodes),
        })
    }

    /// Build a conjunction from `{column, operator, value}` triples
    ///
    /// `fallback` supplies the value of triples whose value is absent or empty.
    pub fn from_triples<F>(triples: &[FilterTriple], mut fallback: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Datum>,
    {
        let mut nodes = Vec::with_capacity(triples.len());
        for triple in triples {
            let column = triple.column.trim();
            validate_identifier("column", column)?;
            let op = Operator::parse(&triple.operator).ok_or_else(|| {
                Error::validation(format!("unknown operator '{}'", triple.operator))
            })?;
            let value = match &triple.value {
                None | Some(Value::Null) => fallback(column)?,
                Some(Value::String(s)) if s.is_empty() => fallback(column)?,
                Some(v) => scalar(column, v)?,
            };
            nodes.push(FilterNode::Comparison {
                column: column.to_string(),
                op,
                value,
            });
        }
        Ok(FilterNode::And(nodes))
    }

    /// Whether the tree matches every row
    pub fn is_empty(&self) -> bool {
        match self {
            FilterNode::Comparison { .. } => false,
            FilterNode::And(children) => children.iter().all(FilterNode::is_empty),
            FilterNode::Or(children) => children.iter().any(FilterNode::is_empty),
        }
    }

    /// Every column the tree compares, in tree order
    pub fn columns(&self) -> Vec<&str> {
        match self {
            FilterNode::Comparison { column, .. } => vec![column.as_str()],
            FilterNode::And(children) | FilterNode::Or(children) => {
                children.iter().flat_map(FilterNode::columns).collect()
            }
        }
    }

    /// Rewrite every comparison value
    pub fn try_map_values<F>(self, f: &mut F) -> Result<Self>
    where
        F: FnMut(Datum) -> Result<Datum>,
    {
        Ok(match self {
            FilterNode::Comparison { column, op, value } => FilterNode::Comparison {
                column,
                op,
                value: f(value)?,
            },
            FilterNode::And(children) => FilterNode::And(
                children
                    .into_iter()
                    .map(|c| c.try_map_values(f))
                    .collect::<Result<_>>()?,
            ),
            FilterNode::Or(children) => FilterNode::Or(
                children
                    .into_iter()
                    .map(|c| c.try_map_values(f))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Compile into a parameterised predicate
    pub fn compile(&self) -> Predicate {
        match self {
            FilterNode::Comparison { column, op, value } => {
                let col = quote_ident(column);
                match (op, value) {
                    (Operator::Eq, Datum::Null) => Predicate::raw(format!("{col} IS NULL")),
                    (Operator::Ne, Datum::Null) => Predicate::raw(format!("{col} IS NOT NULL")),
                    _ => Predicate {
                        sql: format!("{col} {op} ?"),
                        params: vec![value.clone()],
                    },
                }
            }
            FilterNode::And(children) => {
                let mut children = children.iter().filter(|c| !c.is_empty());
                match children.next() {
                    Some(first) => children.fold(first.compile(), |acc, c| acc.and(c.compile())),
                    None => Predicate::always(),
                }
            }
            FilterNode::Or(_) if self.is_empty() => Predicate::always(),
            FilterNode::Or(children) => {
                let mut children = children.iter();
                match children.next() {
                    Some(first) => children.fold(first.compile(), |acc, c| acc.or(c.compile())),
                    None => Predicate::never(),
                }
            }
        }
    }
}

/// A SQL boolean expression with positional `?` parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Datum>,
}

impl Predicate {
    fn raw(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// Matches every row
    pub fn always() -> Self {
        Self::raw("1 = 1".to_string())
    }

    /// Matches no row
    pub fn never() -> Self {
        Self::raw("1 = 0".to_string())
    }

    pub fn is_always(&self) -> bool {
        self.sql == "1 = 1"
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        self.combine("AND", other)
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        self.combine("OR", other)
    }

    fn combine(mut self, op: &str, other: Predicate) -> Self {
        self.sql = format!("({}) {op} ({})", self.sql, other.sql);
        self.params.extend(other.params);
        self
    }
}
