#![allow(dead_code)]

//! Scripted, in-memory implementation of the driver traits.
//! Every call is recorded into a shared log for inspection by tests.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use warehouse_sql::driver::{self, CursorKind, Params, QueryId, QueryStatus, Row};
use warehouse_sql::{ConnectParams, Connector};

#[derive(Default)]
struct State {
    log: Vec<String>,
    // Scripted status checks of each operation. Once exhausted, operations succeed.
    statuses: HashMap<String, VecDeque<Result<QueryStatus, String>>>,
    // Fixture rows of each operation. Operations without fixtures echo themselves.
    rows: HashMap<String, Vec<Value>>,
    rejected: HashSet<String>,
    // Operations whose results fail to be fetched.
    unfetchable: HashSet<String>,
    submitted: HashMap<QueryId, (String, Params)>,
    connects: Vec<ConnectParams>,
    fail_connect: bool,
    fail_close: bool,
}

#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<State>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status checks of `operation`.
    pub fn statuses(self, operation: &str, statuses: Vec<Result<QueryStatus, &str>>) -> Self {
        self.state.lock().unwrap().statuses.insert(
            operation.to_string(),
            statuses
                .into_iter()
                .map(|s| s.map_err(str::to_string))
                .collect(),
        );
        self
    }

    /// Script `count` running statuses of `operation`.
    pub fn running(self, operation: &str, count: usize) -> Self {
        self.statuses(operation, vec![Ok(QueryStatus::Running); count])
    }

    /// Script the fixture rows of `operation`, each being a JSON array of columns.
    pub fn rows(self, operation: &str, rows: Vec<Value>) -> Self {
        self.state
            .lock()
            .unwrap()
            .rows
            .insert(operation.to_string(), rows);
        self
    }

    /// Reject submission or execution of `operation`.
    pub fn reject(self, operation: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(operation.to_string());
        self
    }

    /// Fail fetches of the results of `operation`.
    pub fn fail_fetch(self, operation: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unfetchable
            .insert(operation.to_string());
        self
    }

    pub fn fail_connect(self) -> Self {
        self.state.lock().unwrap().fail_connect = true;
        self
    }

    pub fn fail_close(self) -> Self {
        self.state.lock().unwrap().fail_close = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Log entries which start with `prefix`.
    pub fn logged(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| entry.starts_with(prefix))
            .collect()
    }

    pub fn connects(&self) -> Vec<ConnectParams> {
        self.state.lock().unwrap().connects.clone()
    }

    fn record(&self, entry: String) {
        self.state.lock().unwrap().log.push(entry);
    }
}

pub struct FakeConnection {
    driver: FakeDriver,
}

pub struct FakeCursor {
    driver: FakeDriver,
    kind: CursorKind,
    loaded: VecDeque<Row>,
    // Operation whose results are loaded.
    operation: Option<String>,
    // Driver cursors are Send but needn't be Sync.
    _not_sync: PhantomData<Cell<()>>,
}

#[async_trait]
impl driver::Driver for FakeDriver {
    type Connection = FakeConnection;

    async fn connect(&self, params: ConnectParams) -> anyhow::Result<FakeConnection> {
        self.record("connect".to_string());

        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(anyhow!("incorrect username or password was specified"));
        }
        state.connects.push(params);

        Ok(FakeConnection {
            driver: self.clone(),
        })
    }
}

#[async_trait]
impl driver::Connection for FakeConnection {
    type Cursor = FakeCursor;

    async fn cursor(&self, kind: CursorKind) -> anyhow::Result<FakeCursor> {
        self.driver.record(format!("cursor {kind:?}"));

        Ok(FakeCursor {
            driver: self.driver.clone(),
            kind,
            loaded: VecDeque::new(),
            operation: None,
            _not_sync: PhantomData,
        })
    }

    async fn query_status(&self, query_id: &QueryId) -> anyhow::Result<QueryStatus> {
        self.driver.record(format!("status {query_id}"));

        let mut state = self.driver.state.lock().unwrap();
        let (operation, _) = state
            .submitted
            .get(query_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown query {query_id}"))?;

        match state
            .statuses
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(QueryStatus::Succeeded),
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.driver.record("close connection".to_string());

        if self.driver.state.lock().unwrap().fail_close {
            return Err(anyhow!("connection reset by peer"));
        }
        Ok(())
    }
}

impl FakeCursor {
    // Rows produced by `operation`, in the shape of this cursor.
    fn results(&self, operation: &str, params: &Params) -> Vec<Row> {
        let state = self.driver.state.lock().unwrap();

        let columns: Vec<Vec<Value>> = match state.rows.get(operation) {
            Some(rows) => rows
                .iter()
                .map(|row| row.as_array().cloned().unwrap_or_default())
                .collect(),
            None => vec![vec![json!(operation), serde_json::to_value(params).unwrap()]],
        };

        columns
            .into_iter()
            .map(|columns| match self.kind {
                CursorKind::Tuple => Row::Tuple(columns),
                CursorKind::Dict => Row::Dict(
                    columns
                        .into_iter()
                        .enumerate()
                        .map(|(index, value)| (format!("COL{index}"), value))
                        .collect(),
                ),
            })
            .collect()
    }

    fn check_fetchable(&self) -> anyhow::Result<()> {
        let state = self.driver.state.lock().unwrap();
        match &self.operation {
            Some(operation) if state.unfetchable.contains(operation) => {
                Err(anyhow!("result set of {operation:?} has expired"))
            }
            _ => Ok(()),
        }
    }

    fn check_rejected(&self, operation: &str) -> anyhow::Result<()> {
        if self.driver.state.lock().unwrap().rejected.contains(operation) {
            return Err(anyhow!("SQL compilation error: syntax error in {operation:?}"));
        }
        Ok(())
    }
}

#[async_trait]
impl driver::Cursor for FakeCursor {
    async fn submit_async(&mut self, operation: &str, params: &Params) -> anyhow::Result<QueryId> {
        self.driver.record(format!("submit {operation}"));
        self.check_rejected(operation)?;

        let mut state = self.driver.state.lock().unwrap();
        let query_id = QueryId(format!("q{}", state.submitted.len() + 1));
        state
            .submitted
            .insert(query_id.clone(), (operation.to_string(), params.clone()));

        Ok(query_id)
    }

    async fn load_results(&mut self, query_id: &QueryId) -> anyhow::Result<()> {
        self.driver.record(format!("load {query_id}"));

        let submitted = self.driver.state.lock().unwrap().submitted.get(query_id).cloned();
        let (operation, params) = submitted.ok_or_else(|| anyhow!("unknown query {query_id}"))?;
        self.loaded = self.results(&operation, &params).into();
        self.operation = Some(operation);

        Ok(())
    }

    async fn fetch_one(&mut self) -> anyhow::Result<Option<Row>> {
        self.driver.record("fetch_one".to_string());
        self.check_fetchable()?;
        Ok(self.loaded.pop_front())
    }

    async fn fetch_many(&mut self, size: usize) -> anyhow::Result<Vec<Row>> {
        self.driver.record(format!("fetch_many {size}"));
        self.check_fetchable()?;
        let size = size.min(self.loaded.len());
        Ok(self.loaded.drain(..size).collect())
    }

    async fn fetch_all(&mut self) -> anyhow::Result<Vec<Row>> {
        self.driver.record("fetch_all".to_string());
        self.check_fetchable()?;
        Ok(self.loaded.drain(..).collect())
    }

    async fn execute(&mut self, operation: &str, params: &Params) -> anyhow::Result<()> {
        self.driver.record(format!("execute {operation}"));
        self.check_rejected(operation)?;

        self.loaded = self.results(operation, params).into();
        self.operation = Some(operation.to_string());
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.driver.record("close cursor".to_string());
        Ok(())
    }
}

pub fn connector() -> Connector {
    serde_json::from_value(json!({
        "database": "database",
        "warehouse": "warehouse",
        "schema": "schema",
        "credentials": {
            "account": "account",
            "user": "user",
            "password": "password",
        },
    }))
    .unwrap()
}

/// A tuple row of the given columns.
pub fn tuple(columns: Value) -> Row {
    Row::Tuple(columns.as_array().cloned().unwrap_or_default())
}
