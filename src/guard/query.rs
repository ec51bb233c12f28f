//! Query Guard.
//!
//! Statements are gated on their leading verb, every value is bound through a
//! typed placeholder, and a progress handler enforces the statement timeout.
//! Driver errors are audited in full and surfaced as a generic database error.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use serde_json::{Map, Value};

use crate::audit::AuditLog;
use crate::config::QueryConfig;
use crate::error::{GuardError, GuardResult};
use crate::guard::{transition, GuardKind, Stage};

/// Virtual machine instructions between timeout checks.
const PROGRESS_OPS: i32 = 1000;

/// A bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Param::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Param::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Param::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Param::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Param::Null)
    }
}

impl TryFrom<&Value> for Param {
    type Error = GuardError;

    /// Infer the placeholder type from a JSON value.
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Param::Null),
            Value::Bool(b) => Ok(Param::Bool(*b)),
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => Param::Int(i),
                None => Param::Text(n.to_string()),
            }),
            Value::String(s) => Ok(Param::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(GuardError::validation(
                "Query parameter must be a scalar value",
            )),
        }
    }
}

/// Positional (1-based when bound) or named parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<Param>),
    Named(Vec<(String, Param)>),
}

/// A statement as requested by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: QueryParams,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: QueryParams::None,
        }
    }

    pub fn positional(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params: QueryParams::Positional(params),
        }
    }

    pub fn named(sql: impl Into<String>, params: Vec<(String, Param)>) -> Self {
        Self {
            sql: sql.into(),
            params: QueryParams::Named(params),
        }
    }
}

/// A statement whose verb is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    verb: String,
    request: QueryRequest,
}

impl ValidatedQuery {
    pub fn verb(&self) -> &str {
        &self.verb
    }
}

/// One result row: column name to value.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Affected(usize),
}

impl QueryOutcome {
    pub fn rows(self) -> Vec<Row> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected(_) => Vec::new(),
        }
    }
}

pub struct QueryGuard {
    verbs: BTreeMap<String, bool>,
    timeout: Duration,
    audit: AuditLog,
}

impl QueryGuard {
    pub fn new(config: &QueryConfig, audit: AuditLog) -> Self {
        Self {
            verbs: config.verbs.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            audit,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gate the statement on its verb.
    pub fn validate(&self, request: QueryRequest) -> GuardResult<ValidatedQuery> {
        let verb = statement_verb(&request.sql);
        if !self.verbs.get(&verb).copied().unwrap_or(false) {
            let shown = if verb.is_empty() { "<none>" } else { verb.as_str() };
            return Err(self.audit.reject(
                GuardKind::Query,
                GuardError::authorization(format!("Unauthorized query type attempted: {}", shown)),
            ));
        }
        transition(GuardKind::Query, Stage::Pending, Stage::Validated, &verb);
        Ok(ValidatedQuery { verb, request })
    }

    /// Execute a validated statement.
    pub fn execute(&self, conn: &Connection, query: &ValidatedQuery) -> GuardResult<QueryOutcome> {
        let deadline = Instant::now() + self.timeout;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = conn
            .busy_timeout(self.timeout)
            .map_err(GuardError::from)
            .and_then(|()| run_statement(conn, query));
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Ok(outcome) => {
                transition(GuardKind::Query, Stage::Validated, Stage::Executed, &query.verb);
                Ok(outcome)
            }
            Err(e) => {
                // Full driver detail goes to the audit log only.
                let audited = GuardError::database(format!("Query failed: {}", e.detail()));
                Err(self.audit.reject(GuardKind::Query, audited))
            }
        }
    }

    /// Validate then execute.
    pub fn run(&self, conn: &Connection, request: QueryRequest) -> GuardResult<QueryOutcome> {
        let validated = self.validate(request)?;
        self.execute(conn, &validated)
    }
}

/// Leading keyword of a statement, upper-cased.
pub fn statement_verb(sql: &str) -> String {
    sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn run_statement(conn: &Connection, query: &ValidatedQuery) -> GuardResult<QueryOutcome> {
    let mut stmt = conn.prepare(&query.request.sql)?;
    bind_params(&mut stmt, &query.request.params)?;

    if stmt.readonly() || stmt.column_count() > 0 {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(QueryOutcome::Rows(out))
    } else {
        Ok(QueryOutcome::Affected(stmt.raw_execute()?))
    }
}

fn bind_params(stmt: &mut Statement<'_>, params: &QueryParams) -> GuardResult<()> {
    let expected = stmt.parameter_count();
    match params {
        QueryParams::None => {
            if expected != 0 {
                return Err(GuardError::database(format!(
                    "statement expects {} parameters, none given",
                    expected
                )));
            }
        }
        QueryParams::Positional(values) => {
            if values.len() != expected {
                return Err(GuardError::database(format!(
                    "statement expects {} parameters, {} given",
                    expected,
                    values.len()
                )));
            }
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)?;
            }
        }
        QueryParams::Named(values) => {
            if values.len() != expected {
                return Err(GuardError::database(format!(
                    "statement expects {} parameters, {} given",
                    expected,
                    values.len()
                )));
            }
            for (name, value) in values {
                let index = placeholder_index(stmt, name)?;
                stmt.raw_bind_parameter(index, value)?;
            }
        }
    }
    Ok(())
}

fn placeholder_index(stmt: &Statement<'_>, name: &str) -> GuardResult<usize> {
    let candidates = if name.starts_with([':', '@', '$']) {
        vec![name.to_string()]
    } else {
        vec![format!(":{}", name), format!("@{}", name), format!("${}", name)]
    };
    for candidate in &candidates {
        if let Some(index) = stmt.parameter_index(candidate)? {
            return Ok(index);
        }
    }
    Err(GuardError::database(format!("unknown named parameter '{}'", name)))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
