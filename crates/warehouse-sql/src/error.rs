use crate::driver::QueryId;

/// ConfigError is a problem with connector credentials or configuration,
/// detected before any network activity takes place.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the {0} must be set in either the connector or the call")]
    MissingField(&'static str),
    #[error("one of the authentication methods must be provided: password, private_key, private_key_path, authenticator, token")]
    NoAuthentication,
    #[error("private_key and private_key_path are mutually exclusive")]
    AmbiguousPrivateKey,
    #[error("failed to read private key from {path}")]
    ReadPrivateKey {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("private key is not a PEM-encoded private key")]
    InvalidPrivateKey,
    #[error("an endpoint must be set when the authenticator is 'okta_endpoint'")]
    MissingEndpoint,
    #[error("invalid SSO endpoint {0:?}")]
    InvalidEndpoint(String, #[source] url::ParseError),
    #[error("a token must be set when the authenticator is 'oauth'")]
    MissingToken,
}

/// Error is a failure to run an operation against the database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open a database session")]
    Connection(#[source] anyhow::Error),
    #[error("failed to open a cursor")]
    Cursor(#[source] anyhow::Error),
    #[error("failed to submit operation")]
    Submission(#[source] anyhow::Error),
    #[error("operation {query_id} failed")]
    Status {
        query_id: QueryId,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to fetch results of operation {query_id}")]
    Fetch {
        query_id: QueryId,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to fetch results of a synchronous operation")]
    FetchSync(#[source] anyhow::Error),
    #[error("cancelled while awaiting completion of operation {query_id}")]
    Cancelled { query_id: QueryId },
    #[error("operation {query_id} didn't complete within {}", humantime::format_duration(*.timeout))]
    Timeout {
        query_id: QueryId,
        timeout: std::time::Duration,
    },
    #[error("failed to close the {0}")]
    Close(&'static str, #[source] anyhow::Error),
}

impl Error {
    /// Returns true if this Error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
