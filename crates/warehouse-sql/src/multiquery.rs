use crate::config::Overrides;
use crate::driver::{Connection, CursorKind, Params, Row};
use crate::query::{Fetch, PollPolicy};
use crate::session::{Session, SessionCursor};
use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Control statement which opens a transaction.
pub const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION";
/// Control statement which commits a transaction.
pub const COMMIT_TRANSACTION: &str = "COMMIT";
/// Control statement which rolls back a failed transaction.
pub const ROLLBACK_TRANSACTION: &str = "ROLLBACK";

/// MultiQuery is a sequence of operations which run in order over a single
/// shared cursor, optionally as one transaction.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MultiQuery {
    /// # Operations to run, in order.
    pub operations: Vec<String>,
    /// # Bindings applied to every operation.
    #[serde(default, skip_serializing_if = "Params::is_none")]
    pub params: Params,
    /// # Shape of result rows.
    #[serde(default)]
    pub cursor: CursorKind,
    /// # Whether operations run within one transaction.
    #[serde(default)]
    pub as_transaction: bool,
    /// # Whether results of transaction control statements are returned.
    #[serde(default)]
    pub include_control_results: bool,
    /// # Whether a failed transaction is explicitly rolled back.
    /// If false, rollback is left to the database when the session closes.
    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,
    /// # Polling of operation completion.
    #[serde(default)]
    pub poll: PollPolicy,
    /// # Overrides of connector defaults.
    #[serde(default)]
    pub overrides: Overrides,
}

fn default_rollback_on_failure() -> bool {
    true
}

impl MultiQuery {
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operations: operations.into_iter().map(Into::into).collect(),
            params: Params::None,
            cursor: CursorKind::Tuple,
            as_transaction: false,
            include_control_results: false,
            rollback_on_failure: true,
            poll: PollPolicy::default(),
            overrides: Overrides::default(),
        }
    }
}

// Statement is an operation of a MultiQuery after transaction bracketing.
#[derive(Debug, PartialEq)]
struct Statement<'a> {
    operation: &'a str,
    params: &'a Params,
    control: bool,
}

// Build the statements of `multi`, bracketing them with BEGIN / COMMIT
// if it's a transaction. Control statements don't take the caller's bindings.
fn bracket(multi: &MultiQuery) -> Vec<Statement<'_>> {
    static NO_PARAMS: Params = Params::None;

    let control = |operation| Statement {
        operation,
        params: &NO_PARAMS,
        control: true,
    };
    let mut statements = Vec::with_capacity(multi.operations.len() + 2);

    if multi.as_transaction {
        statements.push(control(BEGIN_TRANSACTION));
    }
    for operation in &multi.operations {
        statements.push(Statement {
            operation: operation.as_str(),
            params: &multi.params,
            control: false,
        });
    }
    if multi.as_transaction {
        statements.push(control(COMMIT_TRANSACTION));
    }
    statements
}

/// Run the operations of `multi` in order over one cursor of `session`,
/// returning one result set per operation in input order.
///
/// A failing operation stops the sequence, and its error is returned.
/// Operations which already ran aren't undone, unless they belong to a
/// transaction which is then rolled back.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(operations = multi.operations.len(), as_transaction = multi.as_transaction),
    err(level = tracing::Level::WARN),
)]
pub async fn run_sequence<C: Connection>(
    session: &Session<C>,
    multi: &MultiQuery,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<Row>>, Error> {
    let mut cursor = session.cursor(multi.cursor).await?;
    let statements = bracket(multi);

    let mut result = run_statements(&mut cursor, &statements, &multi.poll, cancel).await;

    if let Err(err) = &result {
        if multi.as_transaction && multi.rollback_on_failure {
            rollback(&mut cursor, err).await;
        }
    }
    if !multi.include_control_results {
        result = result.map(|results| {
            results
                .into_iter()
                .zip(statements.iter())
                .filter_map(|(rows, statement)| (!statement.control).then_some(rows))
                .collect()
        });
    }

    cursor.release(result).await
}

async fn run_statements<C: Connection>(
    cursor: &mut SessionCursor<'_, C>,
    statements: &[Statement<'_>],
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<Row>>, Error> {
    let mut results = Vec::with_capacity(statements.len());

    for (index, statement) in statements.iter().enumerate() {
        let rows = cursor
            .execute_async(
                statement.operation,
                statement.params,
                Fetch::All,
                policy,
                cancel,
            )
            .await?;

        tracing::debug!(index, rows = rows.len(), "completed operation of sequence");
        results.push(rows);
    }
    Ok(results)
}

// Roll back the open transaction of `cursor` after `cause` failed it.
// A failed rollback is logged, as `cause` is what's reported to the caller.
async fn rollback<C: Connection>(cursor: &mut SessionCursor<'_, C>, cause: &Error) {
    tracing::debug!(error = %cause, "rolling back failed transaction");

    if let Err(err) = cursor
        .execute_sync(ROLLBACK_TRANSACTION, &Params::None)
        .await
    {
        tracing::warn!(error = ?err, cause = %cause, "failed to roll back transaction");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn operations(statements: &[Statement<'_>]) -> Vec<(String, bool)> {
        statements
            .iter()
            .map(|s| (s.operation.to_string(), s.control))
            .collect()
    }

    #[test]
    fn test_bracket_transaction() {
        let mut multi = MultiQuery::new(["SELECT 1", "SELECT 2"]);
        multi.params = Params::Positional(vec![serde_json::json!(42)]);

        assert_eq!(
            operations(&bracket(&multi)),
            vec![("SELECT 1".to_string(), false), ("SELECT 2".to_string(), false)]
        );

        multi.as_transaction = true;
        let statements = bracket(&multi);

        assert_eq!(
            operations(&statements),
            vec![
                (BEGIN_TRANSACTION.to_string(), true),
                ("SELECT 1".to_string(), false),
                ("SELECT 2".to_string(), false),
                (COMMIT_TRANSACTION.to_string(), true),
            ]
        );
        assert!(statements[0].params.is_none());
        assert_eq!(statements[1].params, &multi.params);
        assert!(statements[3].params.is_none());
    }

    #[test]
    fn test_multi_query_defaults() {
        let multi: MultiQuery = serde_json::from_value(serde_json::json!({
            "operations": ["SELECT 1"],
            "asTransaction": true,
            "poll": {"pollInterval": "250ms"},
        }))
        .unwrap();

        assert!(multi.as_transaction);
        assert!(!multi.include_control_results);
        assert!(multi.rollback_on_failure);
        assert_eq!(multi.cursor, CursorKind::Tuple);
        assert_eq!(
            multi.poll,
            PollPolicy::every(std::time::Duration::from_millis(250))
        );
    }
}
