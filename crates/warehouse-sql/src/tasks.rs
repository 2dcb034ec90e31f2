//! Entry points for running operations against a configured Connector.
//!
//! Each call resolves the Connector into fresh ConnectParams, opens its
//! own Session, runs, and releases the Session before returning.
//! Nothing is shared between calls, so they may run concurrently.

use crate::config::{Connector, Overrides};
use crate::driver::{CursorKind, Driver, Params, Row};
use crate::multiquery::{run_sequence, MultiQuery};
use crate::query::{run_async, run_sync, Fetch, PollPolicy};
use crate::session::Session;
use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Query is a single operation to run.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Query {
    /// # Operation text.
    pub operation: String,
    /// # Bindings for placeholders of the operation.
    #[serde(default, skip_serializing_if = "Params::is_none")]
    pub params: Params,
    /// # Shape of result rows.
    #[serde(default)]
    pub cursor: CursorKind,
    /// # Polling of operation completion.
    #[serde(default)]
    pub poll: PollPolicy,
    /// # Overrides of connector defaults.
    #[serde(default)]
    pub overrides: Overrides,
}

impl Query {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Params::None,
            cursor: CursorKind::Tuple,
            poll: PollPolicy::default(),
            overrides: Overrides::default(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Run `query` and return its first row, if any.
pub async fn fetch_one<D: Driver>(
    driver: &D,
    connector: &Connector,
    query: &Query,
    cancel: &CancellationToken,
) -> Result<Option<Row>, Error> {
    let rows = query_rows(driver, connector, query, Fetch::One, cancel).await?;
    Ok(rows.into_iter().next())
}

/// Run `query` and return up to `size` of its rows.
pub async fn fetch_many<D: Driver>(
    driver: &D,
    connector: &Connector,
    query: &Query,
    size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Row>, Error> {
    query_rows(driver, connector, query, Fetch::Many(size), cancel).await
}

/// Run `query` and return all of its rows.
pub async fn fetch_all<D: Driver>(
    driver: &D,
    connector: &Connector,
    query: &Query,
    cancel: &CancellationToken,
) -> Result<Vec<Row>, Error> {
    query_rows(driver, connector, query, Fetch::All, cancel).await
}

/// Run `query` without asynchronous submission, discarding its results.
/// Use this for operations which the database executes synchronously,
/// such as `PUT` of local files into a stage.
pub async fn execute<D: Driver>(
    driver: &D,
    connector: &Connector,
    query: &Query,
) -> Result<(), Error> {
    let params = connector.connect_params(&query.overrides)?;
    let session = Session::open(driver, params).await?;

    let result = run_sync(&session, &query.operation, &query.params, query.cursor).await;
    session.release(result).await.map(|_rows| ())
}

/// Run the operations of `multi` over one Session and cursor,
/// returning a result set for each.
pub async fn multi_query<D: Driver>(
    driver: &D,
    connector: &Connector,
    multi: &MultiQuery,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<Row>>, Error> {
    let params = connector.connect_params(&multi.overrides)?;
    let session = Session::open(driver, params).await?;

    let result = run_sequence(&session, multi, cancel).await;
    session.release(result).await
}

async fn query_rows<D: Driver>(
    driver: &D,
    connector: &Connector,
    query: &Query,
    fetch: Fetch,
    cancel: &CancellationToken,
) -> Result<Vec<Row>, Error> {
    let params = connector.connect_params(&query.overrides)?;
    let session = Session::open(driver, params).await?;

    let result = run_async(
        &session,
        &query.operation,
        &query.params,
        query.cursor,
        fetch,
        &query.poll,
        cancel,
    )
    .await;
    session.release(result).await
}
