//! SQLite-backed store
//!
//! ```text
//! UsageCollector worker ──┐
//! DailyAggregator ────────┼──→ SqliteStore (r2d2 pool, WAL)
//! key cache reload / CLI ─┘
//! ```
//!
//! Timestamps are stored as UTC text (`YYYY-MM-DD HH:MM:SS`) so `DATE()` in
//! SQL lines up with the aggregation date.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, types::Type, OptionalExtension, Row};

use super::{ApiKey, DailyStats, Status, UsageStore, User};
use crate::usage::UsageRecord;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    account       TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL DEFAULT '',
    role          TEXT NOT NULL DEFAULT 'user',
    status        TEXT NOT NULL DEFAULT 'active',
    quota_tokens  INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    key         TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL DEFAULT 'active',
    expires_at  TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_logs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        INTEGER NOT NULL,
    api_key_id     INTEGER NOT NULL,
    model          TEXT NOT NULL,
    backend        TEXT NOT NULL,
    input_tokens   INTEGER NOT NULL,
    output_tokens  INTEGER NOT NULL,
    total_tokens   INTEGER NOT NULL,
    cost_usd       REAL NOT NULL,
    status_code    INTEGER NOT NULL,
    latency_ms     INTEGER NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_logs_created ON usage_logs(created_at);

CREATE TABLE IF NOT EXISTS daily_stats (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    date           TEXT NOT NULL,
    user_id        INTEGER NOT NULL,
    model          TEXT NOT NULL,
    request_count  INTEGER NOT NULL,
    input_tokens   INTEGER NOT NULL,
    output_tokens  INTEGER NOT NULL,
    total_tokens   INTEGER NOT NULL,
    cost_usd       REAL NOT NULL,
    UNIQUE(date, user_id, model)
);
"#;

/// Store backed by a pooled SQLite database
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                PRAGMA foreign_keys=ON;
                "#,
            )
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .with_context(|| format!("opening database {}", db_path.display()))?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    /// Single-connection in-memory database
    ///
    /// The pool never recycles its connection, otherwise the data would vanish.
    #[cfg(test)]
    pub fn in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> anyhow::Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn()?
            .execute_batch(SCHEMA)
            .context("applying schema")?;
        Ok(())
    }

    pub fn create_user(
        &self,
        account: &str,
        name: &str,
        role: &str,
        quota_tokens: i64,
    ) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (account, name, role, status, quota_tokens, created_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
            params![account, name, role, quota_tokens, now_text()],
        )
        .with_context(|| format!("creating user {account}"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_api_key(
        &self,
        user_id: i64,
        name: &str,
        key: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_keys (user_id, key, name, status, expires_at, created_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
            params![
                user_id,
                key,
                name,
                expires_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
                now_text()
            ],
        )
        .context("creating api key")?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns false when no key has this id
    pub fn set_key_status(&self, key_id: i64, status: Status) -> anyhow::Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE api_keys SET status = ?1 WHERE id = ?2",
            params![status.as_str(), key_id],
        )?;
        Ok(changed > 0)
    }

    /// Returns false when no user has this account
    pub fn set_user_status(&self, account: &str, status: Status) -> anyhow::Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE users SET status = ?1 WHERE account = ?2",
            params![status.as_str(), account],
        )?;
        Ok(changed > 0)
    }

    /// Rolled-up rows for one date, ordered by user then model
    pub fn daily_stats(&self, date: NaiveDate) -> anyhow::Result<Vec<DailyStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, user_id, model, request_count, input_tokens, output_tokens,
                    total_tokens, cost_usd
             FROM daily_stats WHERE date = ?1
             ORDER BY user_id, model",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
            let date: String = row.get(0)?;
            Ok(DailyStats {
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                })?,
                user_id: row.get(1)?,
                model: row.get(2)?,
                request_count: row.get(3)?,
                input_tokens: row.get(4)?,
                output_tokens: row.get(5)?,
                total_tokens: row.get(6)?,
                cost_usd: row.get(7)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl UsageStore for SqliteStore {
    fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.conn()?.execute(
            "INSERT INTO usage_logs
                (user_id, api_key_id, model, backend, input_tokens, output_tokens,
                 total_tokens, cost_usd, status_code, latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.user_id,
                record.api_key_id,
                record.model,
                record.backend,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.total_tokens as i64,
                record.cost_usd,
                record.status_code as i64,
                record.latency.as_millis() as i64,
                record.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    fn aggregate_for_date(&self, date: NaiveDate) -> anyhow::Result<usize> {
        let written = self.conn()?.execute(
            "INSERT INTO daily_stats
                (date, user_id, model, request_count, input_tokens, output_tokens,
                 total_tokens, cost_usd)
             SELECT ?1, user_id, model, COUNT(*), SUM(input_tokens), SUM(output_tokens),
                    SUM(total_tokens), SUM(cost_usd)
             FROM usage_logs
             WHERE DATE(created_at) = ?1
             GROUP BY user_id, model
             ON CONFLICT(date, user_id, model) DO UPDATE SET
                request_count = excluded.request_count,
                input_tokens  = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                total_tokens  = excluded.total_tokens,
                cost_usd      = excluded.cost_usd",
            params![date.format(DATE_FORMAT).to_string()],
        )?;
        Ok(written)
    }

    fn list_active_keys(&self) -> anyhow::Result<Vec<ApiKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, key, status, expires_at
             FROM api_keys WHERE status = 'active'",
        )?;
        let keys = stmt.query_map([], |row| {
            let status: String = row.get(3)?;
            let expires_at: Option<String> = row.get(4)?;
            Ok(ApiKey {
                id: row.get(0)?,
                user_id: row.get(1)?,
                key: row.get(2)?,
                status: Status::parse(&status),
                expires_at: expires_at.as_deref().and_then(parse_timestamp),
            })
        })?;

        Ok(keys.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, account, name, role, status, quota_tokens FROM users ORDER BY id",
        )?;
        let users = stmt.query_map([], user_from_row)?;
        Ok(users.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_user_by_account(&self, account: &str) -> anyhow::Result<Option<User>> {
        let user = self
            .conn()?
            .query_row(
                "SELECT id, account, name, role, status, quota_tokens
                 FROM users WHERE account = ?1",
                params![account],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let status: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        account: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        status: Status::parse(&status),
        quota_tokens: row.get(5)?,
    })
}

fn now_text() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}
