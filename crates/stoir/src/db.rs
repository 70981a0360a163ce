use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoirError;
use crate::numbering::{
    SequenceStore, TransactionNumber, TransactionNumberGenerator, resolve_reference_date,
};
use crate::types::ActivityEntry;

mod master;
mod reports;
mod transactions;
mod users;

pub use master::NamedKind;

pub const DB_FILE: &str = "stoir.sqlite";

pub struct Db {
    pub conn: Connection,
    pub data_dir: PathBuf,
}

/// Durable counters: one upsert-and-return per allocation, so a value is
/// never handed out twice even across restarts. Run it inside the caller's
/// SQLite transaction to tie the allocation to the rows it numbers.
pub struct SqliteSequences<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSequences<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteSequences { conn }
    }
}

impl SequenceStore for SqliteSequences<'_> {
    fn next_seq(&self, prefix: &str, date_part: &str) -> Result<u64, StoirError> {
        let seq: i64 = self
            .conn
            .query_row(
                "INSERT INTO sequences (prefix, date_part, last_seq) VALUES (?1, ?2, 1)
                 ON CONFLICT (prefix, date_part) DO UPDATE SET last_seq = last_seq + 1
                 RETURNING last_seq",
                rusqlite::params![prefix, date_part],
                |row| row.get(0),
            )
            .map_err(|e| StoirError::Internal(format!("failed to allocate sequence: {e}")))?;
        Ok(seq as u64)
    }
}

pub(crate) fn conversion_err<E>(err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, err.into())
}

pub(crate) fn parse_dt(s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_err)
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(conversion_err)
}

pub(crate) fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn activity_from_row(row: &rusqlite::Row) -> Result<ActivityEntry, rusqlite::Error> {
    let created_at_str: String = row.get("created_at")?;
    Ok(ActivityEntry {
        id: row.get("id")?,
        actor: row.get("actor")?,
        action: row.get("action")?,
        entity: row.get("entity")?,
        entity_id: row.get("entity_id")?,
        detail: row.get("detail")?,
        created_at: parse_dt(&created_at_str)?,
    })
}

pub(crate) fn log_activity(
    conn: &Connection,
    actor: &str,
    action: &str,
    entity: &str,
    entity_id: &str,
    detail: Option<&str>,
) -> Result<(), StoirError> {
    conn.execute(
        "INSERT INTO activity_log (actor, action, entity, entity_id, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![actor, action, entity, entity_id, detail, now()],
    )
    .map_err(|e| StoirError::Internal(format!("failed to log activity: {e}")))?;
    Ok(())
}

impl Db {
    pub fn open(data_dir: &Path) -> Result<Db, StoirError> {
        fs::create_dir_all(data_dir)
            .map_err(|e| StoirError::Internal(format!("failed to create data dir: {e}")))?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| StoirError::Internal(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| StoirError::Internal(format!("failed to set busy_timeout: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoirError::Internal(format!("failed to enable foreign_keys: {e}")))?;

        Self::run_migrations(&conn)?;

        Ok(Db {
            conn,
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoirError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS categories (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS areas (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS suppliers (
                code    TEXT PRIMARY KEY,
                name    TEXT NOT NULL,
                address TEXT NOT NULL,
                phone   TEXT NOT NULL,
                email   TEXT
            );

            CREATE TABLE IF NOT EXISTS customers (
                code           TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                address        TEXT NOT NULL,
                phone          TEXT NOT NULL,
                contact_person TEXT NOT NULL,
                area_code      TEXT REFERENCES areas(code)
            );

            CREATE TABLE IF NOT EXISTS items (
                code           TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                category_code  TEXT NOT NULL REFERENCES categories(code),
                unit           TEXT NOT NULL CHECK (unit IN ('pcs', 'box', 'kg', 'liter')),
                min_stock      INTEGER NOT NULL DEFAULT 0 CHECK (min_stock >= 0),
                purchase_price INTEGER NOT NULL CHECK (purchase_price >= 0),
                sale_price     INTEGER NOT NULL CHECK (sale_price >= 0),
                stock          INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0)
            );

            CREATE TABLE IF NOT EXISTS sequences (
                prefix    TEXT NOT NULL,
                date_part TEXT NOT NULL,
                last_seq  INTEGER NOT NULL,
                PRIMARY KEY (prefix, date_part)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                number       TEXT PRIMARY KEY,
                kind         TEXT NOT NULL CHECK (kind IN ('purchase', 'sale', 'stock_count', 'claim')),
                txn_date     TEXT NOT NULL,
                partner_code TEXT,
                note         TEXT,
                total        INTEGER NOT NULL,
                actor        TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS transactions_by_date ON transactions (txn_date);

            CREATE TABLE IF NOT EXISTS transaction_lines (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                number       TEXT NOT NULL REFERENCES transactions(number),
                item_code    TEXT NOT NULL REFERENCES items(code),
                qty          INTEGER NOT NULL,
                price        INTEGER NOT NULL,
                discount_pct REAL NOT NULL DEFAULT 0,
                subtotal     INTEGER NOT NULL,
                system_qty   INTEGER
            );

            CREATE TABLE IF NOT EXISTS users (
                username      TEXT PRIMARY KEY,
                display_name  TEXT NOT NULL,
                role          TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'staff')),
                password_hash TEXT NOT NULL,
                salt          TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token      TEXT PRIMARY KEY,
                username   TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                actor      TEXT NOT NULL,
                action     TEXT NOT NULL,
                entity     TEXT NOT NULL,
                entity_id  TEXT NOT NULL,
                detail     TEXT,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(|e| StoirError::Internal(format!("migration failed: {e}")))?;

        Ok(())
    }

    /// Allocates a number outside of any document, e.g. to show it on a form
    /// before saving. The value is consumed either way.
    pub fn allocate_number(
        &self,
        prefix: &str,
        date: Option<&str>,
    ) -> Result<TransactionNumber, StoirError> {
        if prefix.trim().is_empty() {
            return Err(StoirError::InvalidArgument("prefix must not be empty".into()));
        }
        let date = resolve_reference_date(date)?;
        let generator = TransactionNumberGenerator::new(SqliteSequences::new(&self.conn));
        let number = generator.generate_for_date(prefix, date)?;
        tracing::debug!(%number, "allocated transaction number");
        Ok(number)
    }

    pub fn activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoirError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM activity_log ORDER BY id DESC LIMIT ?1")
            .map_err(|e| StoirError::Internal(format!("failed to prepare activity query: {e}")))?;
        let entries = stmt
            .query_map(
                rusqlite::params![i64::try_from(limit).unwrap_or(i64::MAX)],
                activity_from_row,
            )
            .map_err(|e| StoirError::Internal(format!("failed to query activity: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read activity: {e}")))?;
        Ok(entries)
    }

    /// Runs `f` in one SQLite transaction so a row change and its activity
    /// entry land together or not at all.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoirError>,
    ) -> Result<T, StoirError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoirError::Internal(format!("failed to begin transaction: {e}")))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| StoirError::Internal(format!("failed to commit transaction: {e}")))?;
        Ok(out)
    }

    pub(crate) fn exists(&self, sql: &str, key: &str) -> Result<bool, StoirError> {
        exists_on(&self.conn, sql, key)
    }
}

pub(crate) fn exists_on(conn: &Connection, sql: &str, key: &str) -> Result<bool, StoirError> {
    let found: Option<i64> = conn
        .query_row(sql, rusqlite::params![key], |row| row.get(0))
        .optional()
        .map_err(|e| StoirError::Internal(format!("failed to check existence: {e}")))?;
    Ok(found.is_some())
}

pub fn now() -> String {
    timestamp(Utc::now())
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
