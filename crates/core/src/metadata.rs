//! Reuse metadata: in-database proof of a database's state.
//!
//! A single row in an engine-owned table records the checksums the database
//! was built from and the reuse markers. The row is dropped and recreated on
//! every fresh build; ownership of a database passes to whichever process
//! wrote it last.
//!
//! Marker protocol:
//!
//! - transaction: the marker is armed outside the reuse transaction and
//!   cleared inside it. A rollback restores the armed value; a commit by the
//!   code under test leaves it cleared.
//! - journal: the marker is cleared before the test and re-armed only after
//!   the journal has been reversed, so a crash mid-test leaves it cleared.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, params};

use crate::Error;
use crate::spec::ReuseMechanism;

/// Name of the reuse metadata table.
pub const REUSE_TABLE: &str = "__warmdb_reuse";

/// Version of the reuse table layout. Rows written by another version are never trusted.
pub const REUSE_TABLE_VERSION: &str = "1";

/// The single metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseRecord {
    pub project_name: String,
    pub reuse_table_version: String,
    pub orig_database: String,
    pub build_checksum: String,
    pub snapshot_checksum: String,
    pub scenario_checksum: String,
    pub transaction_reusable: Option<bool>,
    pub journal_reusable: Option<bool>,
    pub validation_passed: Option<bool>,
    pub last_used: String,
}

impl ReuseRecord {
    pub fn new(
        project_name: &str, orig_database: &str, build_checksum: &str, snapshot_checksum: &str,
        scenario_checksum: &str,
    ) -> Self {
        Self {
            project_name: project_name.to_string(),
            reuse_table_version: REUSE_TABLE_VERSION.to_string(),
            orig_database: orig_database.to_string(),
            build_checksum: build_checksum.to_string(),
            snapshot_checksum: snapshot_checksum.to_string(),
            scenario_checksum: scenario_checksum.to_string(),
            transaction_reusable: None,
            journal_reusable: None,
            validation_passed: None,
            last_used: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// What a reusable database must match.
#[derive(Debug, Clone, Copy)]
pub struct ReuseExpectation<'a> {
    pub project_name: &'a str,
    pub build_checksum: &'a str,
    pub scenario_checksum: &'a str,
    pub mechanism: Option<ReuseMechanism>,
}

/// Outcome of a reuse check; the reason is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReuseVerdict {
    Clean,
    NotClean(String),
}

impl ReuseVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, ReuseVerdict::Clean)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ReuseVerdict::Clean => None,
            ReuseVerdict::NotClean(reason) => Some(reason),
        }
    }

    /// Judge a record (or its absence) against expectations.
    pub fn judge(record: Option<&ReuseRecord>, expect: &ReuseExpectation<'_>) -> Self {
        let Some(record) = record else {
            return ReuseVerdict::NotClean("no reuse metadata".into());
        };
        if record.reuse_table_version != REUSE_TABLE_VERSION {
            return ReuseVerdict::NotClean(format!("metadata version {} is not current", record.reuse_table_version));
        }
        if record.project_name != expect.project_name {
            return ReuseVerdict::NotClean(format!("built by project `{}`", record.project_name));
        }
        if record.build_checksum != expect.build_checksum {
            return ReuseVerdict::NotClean("build checksum changed".into());
        }
        if record.scenario_checksum != expect.scenario_checksum {
            return ReuseVerdict::NotClean("scenario checksum differs".into());
        }
        if record.validation_passed == Some(false) {
            return ReuseVerdict::NotClean("last verification failed".into());
        }
        match expect.mechanism {
            Some(ReuseMechanism::Transaction) if record.transaction_reusable != Some(true) => {
                ReuseVerdict::NotClean("reuse transaction was committed or never armed".into())
            }
            Some(ReuseMechanism::Journal) if record.journal_reusable != Some(true) => {
                ReuseVerdict::NotClean("journal was not reversed".into())
            }
            _ => ReuseVerdict::Clean,
        }
    }
}

/// Reads and writes the reuse metadata row of one database.
#[derive(Clone, Debug)]
pub struct ReuseMetadataStore {
    conn: Connection,
}

impl ReuseMetadataStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Replace the metadata table with a single row.
    pub async fn write(&self, record: &ReuseRecord) -> Result<(), Error> {
        let record = record.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {REUSE_TABLE};
                     CREATE TABLE {REUSE_TABLE} (
                        project_name TEXT NOT NULL,
                        reuse_table_version TEXT NOT NULL,
                        orig_database TEXT NOT NULL,
                        build_checksum TEXT NOT NULL,
                        snapshot_checksum TEXT NOT NULL,
                        scenario_checksum TEXT NOT NULL,
                        transaction_reusable INTEGER,
                        journal_reusable INTEGER,
                        validation_passed INTEGER,
                        last_used TEXT NOT NULL
                     );"
                ))?;
                conn.execute(
                    &format!(
                        "INSERT INTO {REUSE_TABLE} (
                            project_name, reuse_table_version, orig_database, build_checksum,
                            snapshot_checksum, scenario_checksum, transaction_reusable,
                            journal_reusable, validation_passed, last_used
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                    ),
                    params![
                        &record.project_name,
                        &record.reuse_table_version,
                        &record.orig_database,
                        &record.build_checksum,
                        &record.snapshot_checksum,
                        &record.scenario_checksum,
                        &record.transaction_reusable,
                        &record.journal_reusable,
                        &record.validation_passed,
                        &record.last_used,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Read the metadata row.
    ///
    /// A missing table or row is `None`. Any other backend failure is an
    /// error: an unreachable backend must not be mistaken for "not reusable".
    pub async fn read(&self) -> Result<Option<ReuseRecord>, Error> {
        self.conn
            .call(|conn| -> Result<Option<ReuseRecord>, Error> {
                if !table_exists(conn, REUSE_TABLE)? {
                    return Ok(None);
                }
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT project_name, reuse_table_version, orig_database, build_checksum,
                                    snapshot_checksum, scenario_checksum, transaction_reusable,
                                    journal_reusable, validation_passed, last_used
                             FROM {REUSE_TABLE} LIMIT 1"
                        ),
                        [],
                        |row| {
                            Ok(ReuseRecord {
                                project_name: row.get(0)?,
                                reuse_table_version: row.get(1)?,
                                orig_database: row.get(2)?,
                                build_checksum: row.get(3)?,
                                snapshot_checksum: row.get(4)?,
                                scenario_checksum: row.get(5)?,
                                transaction_reusable: row.get(6)?,
                                journal_reusable: row.get(7)?,
                                validation_passed: row.get(8)?,
                                last_used: row.get(9)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether the database matches `expect` and its marker proves it unchanged.
    pub async fn is_clean(&self, expect: &ReuseExpectation<'_>) -> Result<ReuseVerdict, Error> {
        let record = self.read().await?;
        Ok(ReuseVerdict::judge(record.as_ref(), expect))
    }

    /// Set the mechanism's marker to the armed value.
    pub async fn arm(&self, mechanism: ReuseMechanism) -> Result<(), Error> {
        self.set_marker(mechanism, true).await
    }

    /// Set the mechanism's marker to the "cannot prove safety" value.
    pub async fn disarm(&self, mechanism: ReuseMechanism) -> Result<(), Error> {
        self.set_marker(mechanism, false).await
    }

    async fn set_marker(&self, mechanism: ReuseMechanism, armed: bool) -> Result<(), Error> {
        let column = match mechanism {
            ReuseMechanism::Transaction => "transaction_reusable",
            ReuseMechanism::Journal => "journal_reusable",
        };
        self.update(format!("UPDATE {REUSE_TABLE} SET {column} = ?1"), armed).await
    }

    pub async fn set_validation(&self, passed: bool) -> Result<(), Error> {
        self.update(format!("UPDATE {REUSE_TABLE} SET validation_passed = ?1"), passed).await
    }

    /// Refresh the last-used timestamp.
    pub async fn touch(&self) -> Result<(), Error> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(&format!("UPDATE {REUSE_TABLE} SET last_used = ?1"), params![now])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn update(&self, sql: String, value: bool) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(&sql, params![value])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

pub(crate) fn table_exists(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )
}
