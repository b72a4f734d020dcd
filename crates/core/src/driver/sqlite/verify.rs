//! Post-test verification for SQLite.
//!
//! The baseline stores one content hash per user table plus a schema
//! fingerprint. Comparing recomputes the hashes and reports every table whose
//! content moved, along with a schema entry when the structure changed.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tokio_rusqlite::rusqlite::{self, types::ValueRef};
use tokio_rusqlite::{Connection, params};

use super::{quote, schema_fingerprint, user_tables};
use crate::Error;
use crate::metadata::table_exists;

const BASELINE_TABLE: &str = "__warmdb_verify_baseline";

/// Baseline key holding the schema fingerprint.
pub const SCHEMA_ENTRY: &str = "__schema__";

/// Store the current content hashes as the baseline.
pub async fn record_baseline(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let current = snapshot_hashes(conn)?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {BASELINE_TABLE};
             CREATE TABLE {BASELINE_TABLE} (table_name TEXT PRIMARY KEY, checksum TEXT NOT NULL);"
        ))?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {BASELINE_TABLE} (table_name, checksum) VALUES (?1, ?2)"))?;
            for (table, checksum) in &current {
                insert.execute(params![table, checksum])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}

pub async fn has_baseline(conn: &Connection) -> Result<bool, Error> {
    conn.call(|conn| table_exists(conn, BASELINE_TABLE))
        .await
        .map_err(Error::from)
}

/// Tables whose content differs from the baseline, sorted by name.
///
/// A missing baseline counts as a mismatch of the whole database.
pub async fn compare(conn: &Connection) -> Result<Vec<String>, Error> {
    conn.call(|conn| -> Result<Vec<String>, Error> {
        if !table_exists(conn, BASELINE_TABLE)? {
            return Ok(vec![SCHEMA_ENTRY.to_string()]);
        }
        let baseline: BTreeMap<String, String> = {
            let mut stmt = conn.prepare(&format!("SELECT table_name, checksum FROM {BASELINE_TABLE}"))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let current = snapshot_hashes(conn)?;

        let mut mismatched: Vec<String> = baseline
            .keys()
            .chain(current.keys())
            .filter(|table| baseline.get(*table) != current.get(*table))
            .cloned()
            .collect();
        mismatched.sort();
        mismatched.dedup();
        Ok(mismatched)
    })
    .await
    .map_err(Error::from)
}

fn snapshot_hashes(conn: &rusqlite::Connection) -> rusqlite::Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    hashes.insert(SCHEMA_ENTRY.to_string(), schema_fingerprint(conn)?);
    for table in user_tables(conn)? {
        let hash = table_hash(conn, &table)?;
        hashes.insert(table, hash);
    }
    Ok(hashes)
}

/// Order-independent hash of a table's rows: every column participates in the sort.
fn table_hash(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<String> {
    let columns: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1)",
        params![table],
        |row| row.get(0),
    )?;
    let order = (1..=columns.max(1)).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY {order}", quote(table)))?;
    let width = stmt.column_count();

    let mut hasher = Sha256::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for i in 0..width {
            match row.get_ref(i)? {
                ValueRef::Null => hasher.update(b"n"),
                ValueRef::Integer(v) => {
                    hasher.update(b"i");
                    hasher.update(v.to_le_bytes());
                }
                ValueRef::Real(v) => {
                    hasher.update(b"r");
                    hasher.update(v.to_le_bytes());
                }
                ValueRef::Text(v) => {
                    hasher.update(b"t");
                    hasher.update((v.len() as u64).to_le_bytes());
                    hasher.update(v);
                }
                ValueRef::Blob(v) => {
                    hasher.update(b"b");
                    hasher.update((v.len() as u64).to_le_bytes());
                    hasher.update(v);
                }
            }
        }
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Connection {
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|c| {
            c.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE tags (label TEXT);
                 INSERT INTO users VALUES (1, 'ada'), (2, 'grace');
                 INSERT INTO tags VALUES ('x');",
            )
        })
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_unchanged_database_verifies() {
        let conn = seeded().await;
        assert!(!has_baseline(&conn).await.unwrap());
        record_baseline(&conn).await.unwrap();
        assert!(has_baseline(&conn).await.unwrap());
        assert!(compare(&conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_changed_tables() {
        let conn = seeded().await;
        record_baseline(&conn).await.unwrap();
        conn.call(|c| c.execute_batch("UPDATE users SET name = 'ADA' WHERE id = 1"))
            .await
            .unwrap();
        assert_eq!(compare(&conn).await.unwrap(), vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_row_order_does_not_matter() {
        let conn = seeded().await;
        record_baseline(&conn).await.unwrap();
        conn.call(|c| c.execute_batch("DELETE FROM tags; INSERT INTO tags VALUES ('x');"))
            .await
            .unwrap();
        assert!(compare(&conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_schema_changes() {
        let conn = seeded().await;
        record_baseline(&conn).await.unwrap();
        conn.call(|c| c.execute_batch("CREATE TABLE extra (id INTEGER)")).await.unwrap();
        assert_eq!(compare(&conn).await.unwrap(), vec![SCHEMA_ENTRY.to_string(), "extra".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_baseline_is_a_mismatch() {
        let conn = seeded().await;
        assert_eq!(compare(&conn).await.unwrap(), vec![SCHEMA_ENTRY.to_string()]);
    }
}
