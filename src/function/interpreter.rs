//! Function interpreter
//!
//! Runs every step of an invocation inside one write transaction. The first
//! failing step drops the transaction, rolling back every earlier step.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::env::{input_value, Binding, ExecutionEnvironment};
use super::{Action, Cardinality, FunctionStep, StepFilter};
use crate::caller::Caller;
use crate::catalog::system_tables::is_system_table;
use crate::catalog::{DescriptorField, SchemaError};
use crate::ddl::{quote_ident, ID_COLUMN};
use crate::error::{Error, Result};
use crate::filter::{FilterNode, Operator, Predicate};
use crate::id::IdGenerator;
use crate::storage::{Datum, StorageEngine, Transaction};
use crate::table::{redacted_columns, TableManager};

/// Function interpreter
pub struct Interpreter {
    engine: Arc<dyn StorageEngine>,
    tables: Arc<TableManager>,
    ids: Arc<dyn IdGenerator>,
}

/// Caller input records for one step
fn step_payloads<'a>(
    step: &FunctionStep,
    input: &'a Map<String, Value>,
) -> Result<Vec<Cow<'a, Map<String, Value>>>> {
    let payload = step.output_name().and_then(|name| input.get(name));
    match (step.cardinality(), payload) {
        (Cardinality::Singular, None) => Ok(vec![Cow::Owned(Map::new())]),
        (Cardinality::Singular, Some(Value::Object(obj))) => Ok(vec![Cow::Borrowed(obj)]),
        (Cardinality::Multiple, Some(Value::Array(items))) => items
            .iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(Cow::Borrowed(obj)),
                _ => Err(Error::validation(format!(
                    "input '{}' must be a list of objects",
                    step.name
                ))),
            })
            .collect(),
        (Cardinality::Multiple, None) => Err(Error::validation(format!(
            "missing input list for step '{}'",
            step.name
        ))),
        (Cardinality::Singular, Some(_)) => Err(Error::validation(format!(
            "input '{}' must be an object",
            step.name
        ))),
        (Cardinality::Multiple, Some(_)) => Err(Error::validation(format!(
            "input '{}' must be a list",
            step.name
        ))),
    }
}

impl Interpreter {
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

    /// Run a step list as one transaction
    ///
    /// Returns every output recorded by the steps.
    pub fn run(
        &self,
        steps: &[FunctionStep],
        input: &Map<String, Value>,
        caller: &Caller,
    ) -> Result<BTreeMap<String, Binding>> {
        for step in steps {
            step.validate()?;
        }

        tracing::debug!(steps = steps.len(), user = ?caller.user_id(), "Running function");
        let tx = self.engine.begin_write()?;
        let mut env = ExecutionEnvironment::new(caller.user_id());
        for (index, step) in steps.iter().enumerate() {
            tracing::debug!(
                step = index,
                action = step.action.as_str(),
                table = %step.table,
                "Running step"
            );
            if let Err(e) = self.run_step(tx.as_ref(), step, input, &mut env) {
                let constraint = matches!(&e, Error::Storage(s) if s.is_constraint_violation());
                tracing::warn!(
                    step = index,
                    table = %step.table,
                    constraint,
                    error = %e,
                    "Function step failed"
                );
                return Err(e);
            }
        }
        tx.commit()?;

        let outputs = env.into_outputs();
        tracing::info!(steps = steps.len(), outputs = outputs.len(), "Function completed");
        Ok(outputs)
    }

    fn run_step(
        &self,
        tx: &dyn Transaction,
        step: &FunctionStep,
        input: &Map<String, Value>,
        env: &mut ExecutionEnvironment,
    ) -> Result<()> {
        if is_system_table(&step.table) {
            return Err(SchemaError::SystemTable(step.table.clone()).into());
        }
        let info = self
            .tables
            .describe_in(tx, &step.table, &[DescriptorField::Auth])?;

        match step.action {
            Action::Insert => self.insert(tx, step, input, env),
            Action::Update => self.update(tx, step, input, env),
            Action::Delete => self.delete(tx, step, input, env),
            Action::Fetch => self.fetch(tx, step, info.is_auth(), env),
        }
    }

    fn bind_row(
        step: &FunctionStep,
        payload: &Map<String, Value>,
        env: &ExecutionEnvironment,
    ) -> Result<Vec<(String, Datum)>> {
        let templates = step.templates()?;
        let mut row = Vec::with_capacity(templates.len());
        for (column, template) in templates {
            row.push((column.to_string(), env.resolve(column, &template, payload)?));
        }
        Ok(row)
    }

    fn insert(
        &self,
        tx: &dyn Transaction,
        step: &FunctionStep,
        input: &Map<String, Value>,
        env: &mut ExecutionEnvironment,
    ) -> Result<()> {
        let mut last_id = None;
        for payload in step_payloads(step, input)? {
            let row = Self::bind_row(step, &payload, env)?;
            let id = self.ids.generate();

            let mut columns = vec![quote_ident(ID_COLUMN)];
            let mut params = vec![Datum::from(id.as_str())];
            for (column, value) in row {
                columns.push(quote_ident(&column));
                params.push(value);
            }
            let placeholders = vec!["?"; params.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&step.table),
                columns.join(", "),
                placeholders
            );
            tx.execute(&sql, &params)?;
            last_id = Some(id);
        }

        // Only singular inserts publish their id
        if let (Cardinality::Singular, Some(name), Some(id)) =
            (step.cardinality(), step.output_name(), last_id)
        {
            env.set(name, Binding::Value(Datum::Text(id)));
        }
        Ok(())
    }

    /// Predicate for one payload of an update or delete step
    fn predicate(
        step: &FunctionStep,
        payload: &Map<String, Value>,
        env: &ExecutionEnvironment,
        default_to_id: bool,
    ) -> Result<Predicate> {
        let node = match &step.filter {
            Some(StepFilter::Tree(tree)) => FilterNode::from_json(tree)?,
            Some(StepFilter::Triples(triples)) => {
                FilterNode::from_triples(triples, |column| input_value(payload, column))?
            }
            None if default_to_id => {
                FilterNode::comparison(ID_COLUMN, Operator::Eq, input_value(payload, ID_COLUMN)?)
            }
            None => FilterNode::all(),
        };
        if node.is_empty() && !step.all_rows {
            return Err(Error::validation(format!(
                "step '{}' on '{}' has no condition; set all_rows to affect every row",
                step.name, step.table
            )));
        }
        let node = node.try_map_values(&mut |v: Datum| env.resolve_filter_value(v))?;
        Ok(node.compile())
    }

    fn update(
        &self,
        tx: &dyn Transaction,
        step: &FunctionStep,
        input: &Map<String, Value>,
        env: &mut ExecutionEnvironment,
    ) -> Result<()> {
        for payload in step_payloads(step, input)? {
            let row = Self::bind_row(step, &payload, env)?;
            let predicate = Self::predicate(step, &payload, env, true)?;

            let mut assignments = Vec::with_capacity(row.len());
            let mut params = Vec::with_capacity(row.len() + predicate.params.len());
            for (column, value) in row {
                assignments.push(format!("{} = ?", quote_ident(&column)));
                params.push(value);
            }
            params.extend(predicate.params);
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                quote_ident(&step.table),
                assignments.join(", "),
                predicate.sql
            );
            let n = tx.execute(&sql, &params)?;
            tracing::trace!(table = %step.table, rows = n, "Updated rows");
        }
        Ok(())
    }

    fn delete(
        &self,
        tx: &dyn Transaction,
        step: &FunctionStep,
        input: &Map<String, Value>,
        env: &mut ExecutionEnvironment,
    ) -> Result<()> {
        for payload in step_payloads(step, input)? {
            let predicate = Self::predicate(step, &payload, env, false)?;
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                quote_ident(&step.table),
                predicate.sql
            );
            let n = tx.execute(&sql, &predicate.params)?;
            tracing::trace!(table = %step.table, rows = n, "Deleted rows");
        }
        Ok(())
    }

    fn fetch(
        &self,
        tx: &dyn Transaction,
        step: &FunctionStep,
        auth: bool,
        env: &mut ExecutionEnvironment,
    ) -> Result<()> {
        // Credentials never leave through a function, whoever the caller is
        let hidden: &[&str] = if auth { redacted_columns(false) } else { &[] };

        let wildcard = step.columns.is_empty() || step.columns.iter().any(|c| c == "*");
        let columns: Vec<String> = if wildcard {
            tx.columns(&step.table)?
                .into_iter()
                .map(|c| c.name)
                .filter(|name| !hidden.contains(&name.as_str()))
                .collect()
        } else {
            let is_hidden = |c: &&String| hidden.iter().any(|h| h.eq_ignore_ascii_case(c));
            if let Some(c) = step.columns.iter().find(is_hidden) {
                return Err(Error::authorization(format!(
                    "column '{c}' of '{}' is not readable",
                    step.table
                )));
            }
            step.columns.clone()
        };

        let select: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            select.join(", "),
            quote_ident(&step.table)
        );
        let rows = tx.query(&sql, &[])?;
        tracing::trace!(table = %step.table, rows = rows.len(), "Fetched rows");

        if let Some(name) = step.output_name() {
            env.set(name, Binding::Rows(rows));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::system_tables;
    use crate::ddl::{CreateTableSpec, DdlGenerator, FieldSpec, TableKind};
    use crate::error::ErrorKind;
    use crate::storage::SqliteEngine;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Predictable ids: "id-1", "id-2", ...
    struct SequentialIds(Mutex<u64>);

    impl IdGenerator for SequentialIds {
        fn generate(&self) -> String {
            let mut n = self.0.lock();
            *n += 1;
            format!("id-{n}")
        }
    }

    fn setup() -> (Arc<dyn StorageEngine>, Interpreter) {
        let engine: Arc<dyn StorageEngine> = Arc::new(SqliteEngine::in_memory().unwrap());
        {
            let tx = engine.begin_write().unwrap();
            system_tables::bootstrap(tx.as_ref()).unwrap();
            tx.commit().unwrap();
        }
        let tables = Arc::new(TableManager::new(
            Arc::clone(&engine),
            Duration::from_secs(60),
            DdlGenerator::default(),
        ));
        tables
            .create(
                &CreateTableSpec::new("orders", TableKind::Plain)
                    .field(FieldSpec::new("customer", "text").nullable(true))
                    .field(FieldSpec::new("status", "text").nullable(true))
                    .field(FieldSpec::new("total", "number").nullable(true)),
            )
            .unwrap();
        tables
            .create(
                &CreateTableSpec::new("items", TableKind::Plain)
                    .field(FieldSpec::new("order", "relation").reference("orders"))
                    .field(FieldSpec::new("sku", "text").unique(true)),
            )
            .unwrap();
        tables
            .create(&CreateTableSpec::new("members", TableKind::Users))
            .unwrap();
        let interp = Interpreter::new(
            Arc::clone(&engine),
            tables,
            Arc::new(SequentialIds(Mutex::new(0))),
        );
        (engine, interp)
    }

    fn input(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn count(engine: &Arc<dyn StorageEngine>, table: &str) -> usize {
        let tx = engine.begin_read().unwrap();
        tx.query(&format!("SELECT id FROM \"{table}\""), &[])
            .unwrap()
            .len()
    }

    #[test]
    fn test_insert_binds_previous_output() {
        let (engine, interp) = setup();
        let steps = vec![
            FunctionStep::new(Action::Insert, "orders")
                .named("order")
                .value("customer", "$user.id")
                .value("total", "total"),
            FunctionStep::new(Action::Insert, "items")
                .named("items")
                .multiple()
                .value("order", "$order")
                .value("sku", "sku"),
        ];
        let out = interp
            .run(
                &steps,
                &input(json!({
                    "order": {"total": 12.5},
                    "items": [{"sku": "a"}, {"sku": "b"}]
                })),
                &Caller::user("u1"),
            )
            .unwrap();

        assert_eq!(out.get("order"), Some(&Binding::Value(Datum::from("id-1"))));
        // Multiple inserts publish nothing
        assert!(out.get("items").is_none());

        let tx = engine.begin_read().unwrap();
        let rows = tx
            .query("SELECT \"order\", sku FROM items ORDER BY sku", &[])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("order"), Some(&Datum::from("id-1")));
        let order = tx.query("SELECT customer, total FROM orders", &[]).unwrap();
        assert_eq!(order[0].get("customer"), Some(&Datum::from("u1")));
        assert_eq!(order[0].get("total"), Some(&Datum::Float(12.5)));
    }

    #[test]
    fn test_failure_rolls_back_earlier_steps() {
        let (engine, interp) = setup();
        let steps = vec![
            FunctionStep::new(Action::Insert, "orders")
                .named("order")
                .value("status", "open"),
            FunctionStep::new(Action::Insert, "items")
                .named("items")
                .multiple()
                .value("order", "$order")
                .value("sku", "sku"),
        ];
        // Duplicate sku violates UNIQUE on the second row
        let err = interp
            .run(
                &steps,
                &input(json!({
                    "order": {"status": "open"},
                    "items": [{"sku": "a"}, {"sku": "a"}]
                })),
                &Caller::user("u1"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(count(&engine, "orders"), 0);
        assert_eq!(count(&engine, "items"), 0);
    }

    #[test]
    fn test_dangling_reference_rolls_back() {
        let (engine, interp) = setup();
        let steps = vec![
            FunctionStep::new(Action::Insert, "orders").named("order"),
            FunctionStep::new(Action::Insert, "items")
                .value("order", "$order")
                .value("sku", "sku")
                .named("item"),
        ];
        let out = interp
            .run(
                &steps,
                &input(json!({"item": {"sku": "x"}})),
                &Caller::anonymous(),
            )
            .unwrap();
        assert!(out.contains_key("order"));

        let steps = vec![
            FunctionStep::new(Action::Insert, "orders").named("order"),
            FunctionStep::new(Action::Insert, "items")
                .value("order", "order")
                .value("sku", 7)
                .named("item"),
        ];
        let err = interp
            .run(&steps, &input(json!({"item": {"order": "nope"}})), &Caller::anonymous())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(count(&engine, "orders"), 1);
    }

    #[test]
    fn test_binding_errors_roll_back() {
        let (engine, interp) = setup();
        let steps = vec![
            FunctionStep::new(Action::Insert, "orders").named("order"),
            FunctionStep::new(Action::Insert, "orders").value("customer", "$user.id"),
        ];
        let err = interp
            .run(&steps, &Map::new(), &Caller::anonymous())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(count(&engine, "orders"), 0);

        let steps = vec![FunctionStep::new(Action::Insert, "orders").value("customer", "$nope")];
        let err = interp
            .run(&steps, &Map::new(), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn test_missing_input_is_validation_error() {
        let (_engine, interp) = setup();
        let steps = vec![FunctionStep::new(Action::Insert, "orders")
            .named("order")
            .value("status", "status")];
        let err = interp
            .run(&steps, &input(json!({"order": {}})), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let steps = vec![FunctionStep::new(Action::Insert, "items")
            .named("items")
            .multiple()
            .value("sku", "sku")];
        let err = interp
            .run(&steps, &input(json!({"items": {"sku": "a"}})), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_update_defaults_to_id_and_filters() {
        let (engine, interp) = setup();
        let seed = vec![
            FunctionStep::new(Action::Insert, "orders")
                .named("rows")
                .multiple()
                .value("status", "status")
                .value("total", "total"),
        ];
        interp
            .run(
                &seed,
                &input(json!({"rows": [
                    {"status": "open", "total": 5},
                    {"status": "open", "total": 20},
                    {"status": "closed", "total": 30}
                ]})),
                &Caller::user("u1"),
            )
            .unwrap();

        // id-1 by default filter
        let steps = vec![FunctionStep::new(Action::Update, "orders")
            .named("o")
            .value("status", "status")];
        interp
            .run(
                &steps,
                &input(json!({"o": {"id": "id-1", "status": "paid"}})),
                &Caller::user("u1"),
            )
            .unwrap();

        let steps = vec![FunctionStep::new(Action::Update, "orders")
            .value("status", "flagged")
            .filter(StepFilter::Tree(
                json!({"and": [{"status": "open"}, {"total>": 10}]}),
            ))];
        // "flagged" is an input template; a literal is a non-string value
        let err = interp
            .run(&steps, &Map::new(), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let steps = vec![FunctionStep::new(Action::Update, "orders")
            .named("flag")
            .value("status", "status")
            .filter(StepFilter::Tree(
                json!({"and": [{"status": "open"}, {"total>": 10}]}),
            ))];
        interp
            .run(
                &steps,
                &input(json!({"flag": {"status": "flagged"}})),
                &Caller::user("u1"),
            )
            .unwrap();

        let tx = engine.begin_read().unwrap();
        let rows = tx
            .query("SELECT id, status FROM orders ORDER BY id", &[])
            .unwrap();
        let statuses: Vec<_> = rows.iter().map(|r| r.get("status").cloned()).collect();
        assert_eq!(
            statuses,
            vec![
                Some(Datum::from("paid")),
                Some(Datum::from("flagged")),
                Some(Datum::from("closed")),
            ]
        );
    }

    #[test]
    fn test_unfiltered_update_requires_all_rows() {
        let (_engine, interp) = setup();
        let step = FunctionStep::new(Action::Update, "orders")
            .value("status", 1)
            .filter(StepFilter::Tree(json!({})));
        let err = interp
            .run(&[step.clone()], &Map::new(), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        interp
            .run(&[step.all_rows()], &Map::new(), &Caller::user("u1"))
            .unwrap();
    }

    #[test]
    fn test_delete_with_triples_and_fallback() {
        let (engine, interp) = setup();
        let seed = vec![FunctionStep::new(Action::Insert, "orders")
            .named("rows")
            .multiple()
            .value("customer", "customer")];
        interp
            .run(
                &seed,
                &input(json!({"rows": [
                    {"customer": "u1"}, {"customer": "u2"}, {"customer": "u1"}
                ]})),
                &Caller::user("u1"),
            )
            .unwrap();

        let steps = vec![FunctionStep::new(Action::Delete, "orders")
            .named("del")
            .filter(StepFilter::Triples(
                serde_json::from_value(json!([{"column": "customer", "operator": "="}])).unwrap(),
            ))];
        interp
            .run(
                &steps,
                &input(json!({"del": {"customer": "u1"}})),
                &Caller::user("u1"),
            )
            .unwrap();
        assert_eq!(count(&engine, "orders"), 1);

        let steps = vec![FunctionStep::new(Action::Delete, "orders")
            .filter(StepFilter::Tree(json!({"customer": "$user.id"})))];
        interp.run(&steps, &Map::new(), &Caller::user("u2")).unwrap();
        assert_eq!(count(&engine, "orders"), 0);

        let steps = vec![FunctionStep::new(Action::Delete, "orders")];
        let err = interp
            .run(&steps, &Map::new(), &Caller::user("u2"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_fetch_sees_earlier_writes_and_redacts() {
        let (_engine, interp) = setup();
        let steps = vec![
            FunctionStep::new(Action::Insert, "members")
                .named("m")
                .value("email", "email")
                .value("password", "password")
                .value("salt", "salt"),
            FunctionStep::new(Action::Fetch, "members").named("all"),
        ];
        let out = interp
            .run(
                &steps,
                &input(json!({"m": {"email": "a@b.c", "password": "h", "salt": "s"}})),
                &Caller::user("u1"),
            )
            .unwrap();
        let Some(Binding::Rows(rows)) = out.get("all") else {
            panic!("fetch output missing");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email"), Some(&Datum::from("a@b.c")));
        assert!(rows[0].get("password").is_none());
        assert!(rows[0].get("salt").is_none());

        let steps = vec![FunctionStep::new(Action::Fetch, "members")
            .named("pw")
            .columns(["id", "password"])];
        let err = interp
            .run(&steps, &Map::new(), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = interp
            .run(&steps, &Map::new(), &Caller::admin("root"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let steps = vec![FunctionStep::new(Action::Fetch, "members").named("all")];
        let out = interp
            .run(&steps, &Map::new(), &Caller::admin("root"))
            .unwrap();
        let Some(Binding::Rows(rows)) = out.get("all") else {
            panic!("fetch output missing");
        };
        assert!(rows[0].get("password").is_none());
        assert!(rows[0].get("salt").is_none());

        let steps = vec![FunctionStep::new(Action::Fetch, "members")
            .named("s")
            .columns(["salt"])];
        let err = interp
            .run(&steps, &Map::new(), &Caller::admin("root"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_unknown_and_system_tables() {
        let (_engine, interp) = setup();
        let steps = vec![FunctionStep::new(Action::Fetch, "nope").named("x")];
        let err = interp
            .run(&steps, &Map::new(), &Caller::user("u1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let steps = vec![FunctionStep::new(Action::Fetch, "_function").named("x")];
        let err = interp
            .run(&steps, &Map::new(), &Caller::admin("root"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
