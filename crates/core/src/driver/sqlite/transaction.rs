//! Transaction-based reuse: everything a test does happens inside one
//! transaction that is rolled back afterwards.

use tokio_rusqlite::Connection;

use crate::Error;

/// How the reuse transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEnd {
    RolledBack,
    /// Nothing was open any more: the code under test committed it.
    Committed,
}

pub async fn begin(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| conn.execute_batch("BEGIN"))
        .await
        .map_err(Error::from)
}

/// Roll back the reuse transaction if it is still open.
pub async fn end(conn: &Connection) -> Result<TransactionEnd, Error> {
    conn.call(|conn| -> Result<TransactionEnd, Error> {
        if conn.is_autocommit() {
            return Ok(TransactionEnd::Committed);
        }
        conn.execute_batch("ROLLBACK")?;
        Ok(TransactionEnd::RolledBack)
    })
    .await
    .map_err(Error::from)
}
