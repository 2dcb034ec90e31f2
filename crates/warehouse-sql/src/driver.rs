//! Capabilities consumed from a database driver.
//!
//! The wire protocol is owned by a driver implementation. This crate only
//! sequences calls against these traits: it opens a Connection, creates
//! Cursors from it, submits operations, polls their status, and pulls
//! their results.

use crate::config::ConnectParams;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Driver opens physical connections to the database.
#[async_trait]
pub trait Driver: Send + Sync {
    type Connection: Connection;

    /// Open an authenticated connection using the resolved `params`.
    /// Secrets within `params` are to be revealed only when handed to
    /// the underlying protocol, and must never be logged.
    async fn connect(&self, params: ConnectParams) -> anyhow::Result<Self::Connection>;
}

/// Connection is a live connection to the database.
#[async_trait]
pub trait Connection: Send + Sync {
    type Cursor: Cursor;

    /// Create a cursor whose rows have the given shape.
    async fn cursor(&self, kind: CursorKind) -> anyhow::Result<Self::Cursor>;

    /// Fetch the current status of an asynchronously-submitted operation.
    /// Implementations may return an error if the server reports that the
    /// operation failed, or may return a `QueryStatus::Failed`.
    async fn query_status(&self, query_id: &QueryId) -> anyhow::Result<QueryStatus>;

    /// Returns true if `status` means that the operation is still executing.
    fn is_still_running(&self, status: &QueryStatus) -> bool {
        status.is_still_running()
    }

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Cursor submits operations and retrieves their results.
#[async_trait]
pub trait Cursor: Send {
    /// Submit `operation` for asynchronous execution, returning immediately
    /// with the identifier of the server-side operation.
    async fn submit_async(&mut self, operation: &str, params: &Params) -> anyhow::Result<QueryId>;

    /// Load the results of a completed operation into this cursor,
    /// to be read by a following fetch.
    async fn load_results(&mut self, query_id: &QueryId) -> anyhow::Result<()>;

    async fn fetch_one(&mut self) -> anyhow::Result<Option<Row>>;

    async fn fetch_many(&mut self, size: usize) -> anyhow::Result<Vec<Row>>;

    async fn fetch_all(&mut self) -> anyhow::Result<Vec<Row>>;

    /// Execute `operation` synchronously, leaving its results (if any)
    /// ready to be fetched.
    async fn execute(&mut self, operation: &str, params: &Params) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Bindings for the placeholders of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Params {
    /// The operation has no bindings.
    #[default]
    None,
    /// Bindings for positional placeholders, such as `%s` or `?`.
    Positional(Vec<Value>),
    /// Bindings for named placeholders, such as `%(id)s`.
    Named(Map<String, Value>),
}

impl Params {
    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }
}

/// Shape of the rows produced by a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Rows are ordered sequences of column values.
    #[default]
    Tuple,
    /// Rows are mappings of column name to value.
    Dict,
}

/// Row is a single result row, in the shape of its CursorKind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row {
    Tuple(Vec<Value>),
    Dict(Map<String, Value>),
}

impl Row {
    pub fn kind(&self) -> CursorKind {
        match self {
            Row::Tuple(_) => CursorKind::Tuple,
            Row::Dict(_) => CursorKind::Dict,
        }
    }
}

/// QueryId identifies an operation submitted for asynchronous execution.
/// It's only meaningful to the Connection that submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Status of an asynchronously-submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// Waiting for warehouse resources.
    Queued,
    Running,
    /// Waiting on a lock held by another transaction.
    Blocked,
    Succeeded,
    Failed(String),
}

impl QueryStatus {
    pub fn is_still_running(&self) -> bool {
        matches!(
            self,
            QueryStatus::Queued | QueryStatus::Running | QueryStatus::Blocked
        )
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryStatus::Queued => f.write_str("queued"),
            QueryStatus::Running => f.write_str("running"),
            QueryStatus::Blocked => f.write_str("blocked"),
            QueryStatus::Succeeded => f.write_str("succeeded"),
            QueryStatus::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}
