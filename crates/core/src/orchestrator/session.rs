//! The armed database handed to a test, and the checks run after it.

use tokio_rusqlite::Connection;

use crate::Error;
use crate::driver::{Adapter, JournalOutcome, TransactionEnd};
use crate::settings::ResolvedSettings;
use crate::spec::ReuseMechanism;

/// What the post-test checks did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestOutcome {
    pub rolled_back: bool,
    /// Tables restored by the journal reversal.
    pub reversed_tables: Vec<String>,
    /// The journal could not undo a schema change; the next build rebuilds.
    pub structure_changed: bool,
    pub verified: bool,
}

/// A prepared database with its reuse mechanism armed.
#[derive(Debug)]
pub struct PreparedDatabase {
    conn: Connection,
    settings: ResolvedSettings,
    adapter: Adapter,
    mechanism: Option<ReuseMechanism>,
    verify: bool,
}

impl PreparedDatabase {
    pub(super) fn new(
        conn: Connection, settings: ResolvedSettings, adapter: Adapter, mechanism: Option<ReuseMechanism>, verify: bool,
    ) -> Self {
        Self { conn, settings, adapter, mechanism, verify }
    }

    /// The connection the test should use.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// Undo the test's changes and check the database is still trustworthy.
    ///
    /// Runs the journal reversal, then the transaction check, then
    /// verification.
    ///
    /// # Errors
    ///
    /// `Error::TransactionCommitted` if the code under test committed the
    /// reuse transaction; `Error::VerificationFailed` if the database no
    /// longer matches its baseline.
    pub async fn finish(self) -> Result<TestOutcome, Error> {
        let database = self.settings.database.clone();
        let metadata = self.adapter.metadata(&self.conn);
        let mut outcome = TestOutcome::default();

        match self.mechanism {
            Some(ReuseMechanism::Journal) => match self.adapter.reverse_journal(&self.conn).await? {
                JournalOutcome::Reversed { tables } => {
                    metadata.arm(ReuseMechanism::Journal).await?;
                    tracing::debug!(database = %database, tables = tables.len(), "journal reversed");
                    outcome.reversed_tables = tables;
                }
                JournalOutcome::StructureChanged => {
                    tracing::warn!(database = %database, "schema changed during the test; database will be rebuilt");
                    outcome.structure_changed = true;
                }
            },
            Some(ReuseMechanism::Transaction) => {
                let end = self.adapter.end_transaction(&self.conn).await?;
                // a commit followed by a new BEGIN still looks open; the cleared marker gives it away
                let marker = metadata.read().await?.and_then(|record| record.transaction_reusable);
                if end == TransactionEnd::Committed || marker != Some(true) {
                    tracing::error!(database = %database, "reuse transaction was committed by the code under test");
                    return Err(Error::TransactionCommitted { database });
                }
                outcome.rolled_back = true;
            }
            None => {}
        }

        if self.verify {
            let mismatched = self.adapter.verify(&self.conn).await?;
            if !mismatched.is_empty() {
                metadata.set_validation(false).await?;
                return Err(Error::VerificationFailed { database, tables: mismatched });
            }
            metadata.set_validation(true).await?;
            outcome.verified = true;
        }

        Ok(outcome)
    }
}
