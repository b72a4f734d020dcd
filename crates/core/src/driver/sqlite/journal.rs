//! Journal-based reuse for SQLite.
//!
//! Starting the journal keeps an original copy of every user table and
//! installs triggers that record which tables a test touched. Reversal puts
//! the touched tables back from their copies. Schema changes cannot be
//! reversed this way; they are detected through a schema fingerprint and
//! reported so the database gets rebuilt instead.

use tokio_rusqlite::rusqlite;
use tokio_rusqlite::{Connection, params};

use super::{ENGINE_PREFIX, quote, schema_fingerprint, user_tables};
use crate::Error;
use crate::metadata::table_exists;

const CHANGES_TABLE: &str = "__warmdb_journal_changes";
const STATE_TABLE: &str = "__warmdb_journal_state";
const SEQUENCE_COPY: &str = "__warmdb_journal_seq";
const JOURNAL_GLOB: &str = "__warmdb_journal_*";

/// Result of reversing the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOutcome {
    /// Data changes were undone; lists the tables that were restored.
    Reversed { tables: Vec<String> },
    /// The schema changed during the test; the database cannot be restored.
    StructureChanged,
}

fn copy_table(table: &str) -> String {
    format!("{ENGINE_PREFIX}journal_orig_{table}")
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Begin journaling. Reuses the existing copies when the schema has not moved.
pub async fn start(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let fingerprint = schema_fingerprint(conn)?;
        if stored_fingerprint(conn)?.as_deref() == Some(fingerprint.as_str()) {
            conn.execute(&format!("DELETE FROM {CHANGES_TABLE}"), [])?;
            return Ok(());
        }

        drop_journal_objects(conn)?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE {CHANGES_TABLE} (table_name TEXT PRIMARY KEY);
             CREATE TABLE {STATE_TABLE} (schema TEXT NOT NULL);"
        ))?;
        for table in user_tables(&tx)? {
            let name = quote(&table);
            let copy = quote(&copy_table(&table));
            let record = format!("INSERT OR IGNORE INTO {CHANGES_TABLE} (table_name) VALUES ({})", literal(&table));
            let mut sql = format!("CREATE TABLE {copy} AS SELECT * FROM {name};");
            for (suffix, event) in [("ins", "INSERT"), ("upd", "UPDATE"), ("del", "DELETE")] {
                let trigger = quote(&format!("{ENGINE_PREFIX}journal_{table}_{suffix}"));
                sql.push_str(&format!("CREATE TRIGGER {trigger} AFTER {event} ON {name} BEGIN {record}; END;"));
            }
            tx.execute_batch(&sql)?;
        }
        if table_exists(&tx, "sqlite_sequence")? {
            tx.execute_batch(&format!("CREATE TABLE {SEQUENCE_COPY} AS SELECT * FROM sqlite_sequence;"))?;
        }
        tx.execute(&format!("INSERT INTO {STATE_TABLE} (schema) VALUES (?1)"), params![fingerprint])?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}

/// Undo the data changes recorded since [`start`].
pub async fn reverse(conn: &Connection) -> Result<JournalOutcome, Error> {
    conn.call(|conn| -> Result<JournalOutcome, Error> {
        let fingerprint = schema_fingerprint(conn)?;
        if stored_fingerprint(conn)?.as_deref() != Some(fingerprint.as_str()) {
            return Ok(JournalOutcome::StructureChanged);
        }

        let changed: Vec<String> = {
            let mut stmt = conn.prepare(&format!("SELECT table_name FROM {CHANGES_TABLE} ORDER BY table_name"))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        conn.execute_batch("PRAGMA foreign_keys=OFF;")?;
        let result = restore_tables(conn, &changed);
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        result?;

        Ok(JournalOutcome::Reversed { tables: changed })
    })
    .await
    .map_err(Error::from)
}

fn restore_tables(conn: &mut rusqlite::Connection, tables: &[String]) -> Result<(), Error> {
    let tx = conn.transaction()?;
    for table in tables {
        let name = quote(table);
        let copy = quote(&copy_table(table));
        tx.execute_batch(&format!("DELETE FROM {name}; INSERT INTO {name} SELECT * FROM {copy};"))?;
    }
    if table_exists(&tx, SEQUENCE_COPY)? {
        tx.execute_batch(&format!(
            "DELETE FROM sqlite_sequence; INSERT INTO sqlite_sequence SELECT * FROM {SEQUENCE_COPY};"
        ))?;
    }
    tx.execute(&format!("DELETE FROM {CHANGES_TABLE}"), [])?;
    tx.commit()?;
    Ok(())
}

fn stored_fingerprint(conn: &rusqlite::Connection) -> Result<Option<String>, Error> {
    if !table_exists(conn, STATE_TABLE)? {
        return Ok(None);
    }
    let schema = conn
        .query_row(&format!("SELECT schema FROM {STATE_TABLE} LIMIT 1"), [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
        })?;
    Ok(schema)
}

fn drop_journal_objects(conn: &rusqlite::Connection) -> Result<(), Error> {
    let objects: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT type, name FROM sqlite_master WHERE name GLOB ?1 AND type IN ('table', 'trigger')")?;
        let rows = stmt.query_map([JOURNAL_GLOB], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    // triggers first: dropping a copy table never touches them, but they reference the changes table
    for (kind, name) in objects.iter().filter(|(kind, _)| kind == "trigger").chain(objects.iter().filter(|(kind, _)| kind == "table")) {
        let keyword = if kind == "trigger" { "TRIGGER" } else { "TABLE" };
        conn.execute_batch(&format!("DROP {keyword} IF EXISTS {}", quote(name)))?;
    }
    Ok(())
}
