use crate::config::{ConnectParams, ParamValue};
use crate::driver::{self, Connection, CursorKind, Driver};
use crate::Error;

/// Session owns one live Connection to the database.
///
/// A Session is opened per unit of work and is released exactly once,
/// by `release()` or `close()`. Cursors borrow their Session, so they're
/// always released before it.
pub struct Session<C: Connection> {
    connection: C,
    closed: bool,
}

/// SessionCursor is a Cursor scoped to the Session which created it.
pub struct SessionCursor<'s, C: Connection> {
    pub(crate) session: &'s Session<C>,
    pub(crate) cursor: C::Cursor,
    kind: CursorKind,
    closed: bool,
}

impl<C: Connection> Session<C> {
    /// Open a Session using resolved `params`.
    /// Sessions auto-commit unless `params` explicitly disable it.
    #[tracing::instrument(level = "debug", skip_all, err(level = tracing::Level::WARN))]
    pub async fn open<D>(driver: &D, mut params: ConnectParams) -> Result<Self, Error>
    where
        D: Driver<Connection = C>,
    {
        if !params.contains("autocommit") {
            params.insert("autocommit", ParamValue::Bool(true));
        }
        let connection = driver.connect(params).await.map_err(Error::Connection)?;

        tracing::debug!("opened database session");

        Ok(Self {
            connection,
            closed: false,
        })
    }

    /// Open a SessionCursor which produces rows of the given `kind`.
    pub async fn cursor(&self, kind: CursorKind) -> Result<SessionCursor<'_, C>, Error> {
        let cursor = self.connection.cursor(kind).await.map_err(Error::Cursor)?;

        Ok(SessionCursor {
            session: self,
            cursor,
            kind,
            closed: false,
        })
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Close the Session. Closing an already-closed Session is a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.connection
            .close()
            .await
            .map_err(|err| Error::Close("session", err))
    }

    /// Close the Session after completing a unit of work having `result`.
    /// An error of the work takes precedence over an error closing the Session.
    pub async fn release<T>(mut self, result: Result<T, Error>) -> Result<T, Error> {
        let closed = self.close().await;
        merge_release("session", result, closed)
    }
}

impl<'s, C: Connection> SessionCursor<'s, C> {
    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn session(&self) -> &'s Session<C> {
        self.session
    }

    /// Close the cursor. Closing an already-closed cursor is a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        driver::Cursor::close(&mut self.cursor)
            .await
            .map_err(|err| Error::Close("cursor", err))
    }

    /// Close the cursor after completing a unit of work having `result`.
    /// An error of the work takes precedence over an error closing the cursor.
    pub async fn release<T>(mut self, result: Result<T, Error>) -> Result<T, Error> {
        let closed = self.close().await;
        merge_release("cursor", result, closed)
    }
}

fn merge_release<T>(
    resource: &'static str,
    result: Result<T, Error>,
    closed: Result<(), Error>,
) -> Result<T, Error> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(resource, error = ?close_err, "failed to close after a prior error");
            Err(err)
        }
    }
}

// Dropping an open handle happens when its owning future is dropped mid-flight.
// The driver's own Drop then releases the resource.
impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("database session dropped without being closed");
        }
    }
}

impl<C: Connection> Drop for SessionCursor<'_, C> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("cursor dropped without being closed");
        }
    }
}
