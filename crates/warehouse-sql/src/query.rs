use crate::driver::{Connection, Cursor, CursorKind, Params, QueryId, QueryStatus, Row};
use crate::session::{Session, SessionCursor};
use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fetch is the shape of results pulled for a completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// At most one row.
    One,
    /// At most the given number of rows.
    Many(usize),
    /// All rows.
    All,
}

/// PollPolicy controls how the completion of an operation is awaited.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PollPolicy {
    /// # Interval between checks of operation status.
    #[serde(default = "PollPolicy::default_interval", with = "humantime_serde")]
    #[schemars(schema_with = "interval_schema")]
    pub poll_interval: Duration,
    /// # Maximum time to await operation completion.
    /// Unbounded if not set.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(schema_with = "timeout_schema")]
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    fn default_interval() -> Duration {
        Duration::from_secs(1)
    }

    pub fn every(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::every(Self::default_interval())
    }
}

const DURATION_PATTERN: &str = "^\\d+(ms|s|m|h)$";

fn interval_schema(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "string",
        "pattern": DURATION_PATTERN,
    }))
    .unwrap()
}

fn timeout_schema(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    serde_json::from_value(serde_json::json!({
        "type": ["string", "null"],
        "pattern": DURATION_PATTERN,
    }))
    .unwrap()
}

impl<'s, C: Connection> SessionCursor<'s, C> {
    /// Submit `operation` for asynchronous execution.
    #[tracing::instrument(level = "debug", skip(self, params), err(level = tracing::Level::WARN))]
    pub async fn submit(&mut self, operation: &str, params: &Params) -> Result<QueryId, Error> {
        self.cursor
            .submit_async(operation, params)
            .await
            .map_err(Error::Submission)
    }

    /// Pull the results of completed operation `query_id`.
    pub async fn fetch(&mut self, query_id: &QueryId, fetch: Fetch) -> Result<Vec<Row>, Error> {
        let map_err = |source| Error::Fetch {
            query_id: query_id.clone(),
            source,
        };
        self.cursor.load_results(query_id).await.map_err(map_err)?;

        let rows = match fetch {
            Fetch::One => self
                .cursor
                .fetch_one()
                .await
                .map_err(map_err)?
                .into_iter()
                .collect(),
            Fetch::Many(size) => self.cursor.fetch_many(size).await.map_err(map_err)?,
            Fetch::All => self.cursor.fetch_all().await.map_err(map_err)?,
        };
        Ok(rows)
    }

    /// Submit `operation`, await its completion, and pull its results.
    pub async fn execute_async(
        &mut self,
        operation: &str,
        params: &Params,
        fetch: Fetch,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, Error> {
        let query_id = self.submit(operation, params).await?;
        // Cursors are only Send, so the poll loop borrows the connection instead.
        await_completion(self.session.connection(), &query_id, policy, cancel).await?;
        self.fetch(&query_id, fetch).await
    }

    /// Execute `operation` without asynchronous submission, and pull all of its rows.
    /// This suits operations which are already synchronous at the protocol level,
    /// such as staging of local files.
    #[tracing::instrument(level = "debug", skip(self, params), err(level = tracing::Level::WARN))]
    pub async fn execute_sync(
        &mut self,
        operation: &str,
        params: &Params,
    ) -> Result<Vec<Row>, Error> {
        self.cursor
            .execute(operation, params)
            .await
            .map_err(Error::Submission)?;

        // Results of a synchronous execution aren't addressed by an operation ID.
        self.cursor.fetch_all().await.map_err(Error::FetchSync)
    }
}

/// Poll the status of `query_id` over `connection` until it's no longer running.
///
/// Between polls the task sleeps for the policy's interval, and returns
/// `Error::Cancelled` if `cancel` is signaled while it does. If the policy
/// has a timeout, sleeps are cut short at its deadline and a still-running
/// operation then fails with `Error::Timeout`.
#[tracing::instrument(level = "debug", skip(connection, policy, cancel), err(level = tracing::Level::WARN))]
pub async fn await_completion<C: Connection>(
    connection: &C,
    query_id: &QueryId,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let deadline = policy
        .timeout
        .map(|timeout| (tokio::time::Instant::now() + timeout, timeout));
    let mut polls = 0u64;

    loop {
        let status = connection
            .query_status(query_id)
            .await
            .map_err(|source| Error::Status {
                query_id: query_id.clone(),
                source,
            })?;
        polls += 1;

        if let QueryStatus::Failed(message) = &status {
            return Err(Error::Status {
                query_id: query_id.clone(),
                source: anyhow::anyhow!("{message}"),
            });
        } else if !connection.is_still_running(&status) {
            tracing::debug!(%query_id, %status, polls, "operation completed");
            return Ok(());
        }

        let mut wake = tokio::time::Instant::now() + policy.poll_interval;

        if let Some((deadline, timeout)) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    query_id: query_id.clone(),
                    timeout,
                });
            }
            wake = wake.min(deadline);
        }
        tracing::trace!(%query_id, %status, polls, "operation is still running");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { query_id: query_id.clone() });
            }
            () = tokio::time::sleep_until(wake) => (),
        }
    }
}

/// Run `operation` over a new cursor of `session` using the asynchronous
/// submit / poll / fetch protocol. The cursor is closed on every exit path.
pub async fn run_async<C: Connection>(
    session: &Session<C>,
    operation: &str,
    params: &Params,
    kind: CursorKind,
    fetch: Fetch,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Row>, Error> {
    let mut cursor = session.cursor(kind).await?;
    let result = cursor
        .execute_async(operation, params, fetch, policy, cancel)
        .await;
    cursor.release(result).await
}

/// Run `operation` over a new cursor of `session` without asynchronous submission.
/// The cursor is closed on every exit path.
pub async fn run_sync<C: Connection>(
    session: &Session<C>,
    operation: &str,
    params: &Params,
    kind: CursorKind,
) -> Result<Vec<Row>, Error> {
    let mut cursor = session.cursor(kind).await?;
    let result = cursor.execute_sync(operation, params).await;
    cursor.release(result).await
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_poll_policy_schema() {
        let schema = schemars::schema_for!(PollPolicy);
        let properties = &schema.as_value()["properties"];

        assert_eq!(properties["pollInterval"]["type"], json!("string"));
        assert_eq!(properties["timeout"]["type"], json!(["string", "null"]));
        assert_eq!(
            properties["pollInterval"]["pattern"],
            properties["timeout"]["pattern"]
        );
    }

    #[test]
    fn test_poll_policy_parsing() {
        let policy: PollPolicy =
            serde_json::from_value(json!({"pollInterval": "250ms", "timeout": "1m"})).unwrap();
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Some(Duration::from_secs(60)));

        assert_eq!(
            serde_json::from_value::<PollPolicy>(json!({})).unwrap(),
            PollPolicy::default()
        );
        assert!(serde_json::from_value::<PollPolicy>(json!({"pollInterval": null})).is_err());
    }
}
