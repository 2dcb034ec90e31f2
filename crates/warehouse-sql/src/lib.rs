//! warehouse-sql runs SQL operations against an analytical database
//! through an asynchronous submit / poll / fetch protocol, and groups
//! multiple operations into transactional sequences over one session.
//!
//! The wire protocol is provided by an implementation of `driver::Driver`.

pub mod config;
pub mod driver;
pub mod multiquery;
pub mod query;
pub mod secret;
pub mod session;
pub mod tasks;

mod error;

pub use config::{Authenticator, ConnectParams, Connector, Credentials, Overrides, ParamValue};
pub use driver::{CursorKind, Params, QueryId, QueryStatus, Row};
pub use error::{ConfigError, Error};
pub use multiquery::{run_sequence, MultiQuery};
pub use query::{await_completion, run_async, run_sync, Fetch, PollPolicy};
pub use secret::Secret;
pub use session::{Session, SessionCursor};
pub use tasks::{execute, fetch_all, fetch_many, fetch_one, multi_query, Query};
