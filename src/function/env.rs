//! Execution environment - per-invocation step outputs

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::TemplateValue;
use crate::error::{Error, Result};
use crate::storage::{Datum, Record};

/// A value recorded under a step's output name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Binding {
    /// A single value, such as the id of an inserted row
    Value(Datum),
    /// Rows returned by a fetch step
    Rows(Vec<Record>),
}

/// Outputs accumulated by one invocation
///
/// The caller's identity is available to templates as `$user.id` but is
/// not part of the returned outputs.
#[derive(Debug, Default)]
pub struct ExecutionEnvironment {
    user_id: Option<String>,
    outputs: BTreeMap<String, Binding>,
}

impl ExecutionEnvironment {
    pub fn new(user_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.map(String::from),
            outputs: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, binding: Binding) {
        self.outputs.insert(name.into(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.outputs.get(name)
    }

    /// Resolve `$user.id`
    pub fn user_id(&self) -> Result<Datum> {
        self.user_id
            .as_deref()
            .map(Datum::from)
            .ok_or_else(|| Error::binding("$user.id used without an authenticated caller"))
    }

    /// Resolve `$name` to a single value
    pub fn reference(&self, name: &str) -> Result<Datum> {
        match self.outputs.get(name) {
            Some(Binding::Value(v)) => Ok(v.clone()),
            Some(Binding::Rows(_)) => Err(Error::binding(format!(
                "${name} holds fetched rows, not a single value"
            ))),
            None => Err(Error::binding(format!("${name} is not bound"))),
        }
    }

    /// Resolve one column template
    ///
    /// `payload` is the caller's input record for the current step.
    pub fn resolve(
        &self,
        column: &str,
        template: &TemplateValue,
        payload: &Map<String, Value>,
    ) -> Result<Datum> {
        match template {
            TemplateValue::UserId => self.user_id(),
            TemplateValue::Reference(name) => self.reference(name),
            TemplateValue::Literal(d) => Ok(d.clone()),
            TemplateValue::Input => input_value(payload, column),
        }
    }

    /// Resolve a `$` token found in a filter value, leaving other values as is
    pub fn resolve_filter_value(&self, value: Datum) -> Result<Datum> {
        let token = match &value {
            Datum::Text(s) => TemplateValue::parse_str(s),
            _ => None,
        };
        match token {
            Some(TemplateValue::UserId) => self.user_id(),
            Some(TemplateValue::Reference(name)) if !name.is_empty() => self.reference(&name),
            _ => Ok(value),
        }
    }

    pub fn into_outputs(self) -> BTreeMap<String, Binding> {
        self.outputs
    }
}

/// The caller's scalar value for `column`
pub fn input_value(payload: &Map<String, Value>, column: &str) -> Result<Datum> {
    let value = payload
        .get(column)
        .ok_or_else(|| Error::validation(format!("missing input '{column}'")))?;
    Datum::from_json(value)
        .ok_or_else(|| Error::validation(format!("input '{column}' must be a scalar")))
}
