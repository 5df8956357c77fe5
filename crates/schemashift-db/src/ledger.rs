use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use schemashift_common::{Error, Result};
use serde::Serialize;

use crate::schema::{quote_ident, table_exists};

/// A ledger row: one successfully applied unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

/// The applied-migrations ledger, kept in the database it describes.
///
/// Rows are ordered by an autoincrement sequence so the application order
/// survives even when ids were applied out of lexical order.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        table_exists(conn, &self.table)
    }

    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )",
            quote_ident(&self.table)
        ))
        .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))
    }

    /// Applied units in application order. Empty if the ledger does not exist yet.
    pub fn applied(&self, conn: &Connection) -> Result<Vec<AppliedMigration>> {
        if !self.exists(conn)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, applied_at FROM {} ORDER BY seq ASC",
                quote_ident(&self.table)
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let raw: String = row.get(1)?;
                let applied_at = parse_datetime(&raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                })?;
                Ok(AppliedMigration {
                    id: row.get(0)?,
                    applied_at,
                })
            })
            .map_err(|e| Error::Database(format!("failed to read ledger: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read ledger: {e}")))
    }

    pub fn contains(&self, conn: &Connection, id: &str) -> Result<bool> {
        if !self.exists(conn)? {
            return Ok(false);
        }
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE id = ?1",
                    quote_ident(&self.table)
                ),
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to read ledger: {e}")))?;
        Ok(count > 0)
    }

    pub fn record(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (id, applied_at) VALUES (?1, ?2)",
                quote_ident(&self.table)
            ),
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to record migration {id}: {e}")))?;
        Ok(())
    }

    pub fn remove(&self, conn: &Connection, id: &str) -> Result<()> {
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", quote_ident(&self.table)),
                params![id],
            )
            .map_err(|e| Error::Database(format!("failed to remove migration {id}: {e}")))?;
        if removed == 0 {
            return Err(Error::NotFound(format!("ledger entry {id}")));
        }
        Ok(())
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "invalid ledger table name: {name:?}"
        )));
    }
    Ok(())
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by hand with datetime('now')
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_keeps_application_order() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("_schema_migrations").unwrap();
        assert!(!ledger.exists(&conn).unwrap());
        assert!(ledger.applied(&conn).unwrap().is_empty());

        ledger.ensure(&conn).unwrap();
        ledger.record(&conn, "20240301000000-c").unwrap();
        ledger.record(&conn, "20240101000000-a").unwrap();

        let ids: Vec<String> = ledger
            .applied(&conn)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["20240301000000-c", "20240101000000-a"]);
        assert!(ledger.contains(&conn, "20240101000000-a").unwrap());
    }

    #[test]
    fn duplicate_record_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("_schema_migrations").unwrap();
        ledger.ensure(&conn).unwrap();

        ledger.record(&conn, "20240101000000-a").unwrap();
        assert!(ledger.record(&conn, "20240101000000-a").is_err());
    }

    #[test]
    fn remove_missing_entry_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("_schema_migrations").unwrap();
        ledger.ensure(&conn).unwrap();

        let err = ledger.remove(&conn, "20240101000000-a").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn table_name_is_validated() {
        assert!(Ledger::new("SequelizeMeta").is_ok());
        assert!(Ledger::new("_ledger_2").is_ok());
        assert!(Ledger::new("").is_err());
        assert!(Ledger::new("2ledger").is_err());
        assert!(Ledger::new("ledger; DROP TABLE x").is_err());
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let dt = parse_datetime("2024-01-10 09:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-10T09:30:00+00:00");
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn unreadable_timestamp_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("_schema_migrations").unwrap();
        ledger.ensure(&conn).unwrap();
        conn.execute(
            "INSERT INTO _schema_migrations (id, applied_at) VALUES ('20240101000000-a', 'soon')",
            [],
        )
        .unwrap();

        let err = ledger.applied(&conn).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().contains("failed to read ledger"));
    }
}
