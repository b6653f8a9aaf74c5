// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed account store.
//
// One row per billing identity. The store owns the only write path to
// `pages_printed`: `commit_usage` performs a single atomic UPDATE so that
// sibling gateway invocations racing on the same account are serialized by
// SQLite itself, never by the callers.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use zaehlwerk_core::error::{Result, ZaehlwerkError};
use zaehlwerk_core::types::{Account, AccountStatus, Group};

/// Schema for the account and group tables.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS account (
        username TEXT PRIMARY KEY,
        gid INTEGER,
        status TEXT NOT NULL,
        quota INTEGER NOT NULL DEFAULT 0,
        pages_printed INTEGER NOT NULL DEFAULT 0,
        date_added TEXT NOT NULL,
        date_modified TEXT
    );
    CREATE TABLE IF NOT EXISTS quota_group (
        gid INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        page_count INTEGER
    );
"#;

/// Fields an account update may touch. `None` leaves the column untouched.
#[derive(Debug, Default, Clone)]
pub struct AccountChanges {
    pub status: Option<AccountStatus>,
    pub quota: Option<i64>,
    pub gid: Option<i64>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.quota.is_none() && self.gid.is_none()
    }
}

/// Persistent account store backed by a SQLite database.
///
/// All methods are synchronous; the gateway handles one job per process and
/// has no async surface.
pub struct AccountStore {
    conn: Connection,
}

impl AccountStore {
    /// Open (or create) the account database at the given path.
    ///
    /// Applies WAL journal mode so that many sibling gateway processes can
    /// read while one commits, and bootstraps the schema if missing.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ZaehlwerkError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ZaehlwerkError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| ZaehlwerkError::Database(format!("create tables: {e}")))?;

        info!("account database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ZaehlwerkError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| ZaehlwerkError::Database(format!("create tables: {e}")))?;

        debug!("in-memory account database opened");
        Ok(Self { conn })
    }

    // -- Accounts -------------------------------------------------------------

    /// Insert a new account row.
    #[instrument(skip(self, account), fields(username = %account.username))]
    pub fn create_account(&self, account: &Account) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO account (username, gid, status, quota, pages_printed,
                 date_added, date_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    account.username,
                    account.gid,
                    account.status.as_str(),
                    account.quota,
                    account.pages_printed,
                    account.date_added.to_rfc3339(),
                    account.date_modified.map(|dt| dt.to_rfc3339()),
                ],
            )
            .map_err(|e| ZaehlwerkError::Database(format!("insert account: {e}")))?;

        info!(username = %account.username, "account created");
        Ok(())
    }

    /// Retrieve a single account by username. `None` if it does not exist.
    pub fn get_account(&self, username: &str) -> Result<Option<Account>> {
        self.conn
            .query_row(
                "SELECT username, gid, status, quota, pages_printed,
                        date_added, date_modified
                 FROM account WHERE username = ?1",
                params![username],
                row_to_account,
            )
            .optional()
            .map_err(|e| ZaehlwerkError::Database(format!("get account: {e}")))
    }

    /// All accounts, ordered by username.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT username, gid, status, quota, pages_printed,
                        date_added, date_modified
                 FROM account ORDER BY username ASC",
            )
            .map_err(|e| ZaehlwerkError::Database(format!("prepare list accounts: {e}")))?;

        let accounts = stmt
            .query_map([], row_to_account)
            .map_err(|e| ZaehlwerkError::Database(format!("query list accounts: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ZaehlwerkError::Database(format!("collect accounts: {e}")))?;

        debug!(count = accounts.len(), "retrieved all accounts");
        Ok(accounts)
    }

    /// Apply a partial update to an account and bump `date_modified`.
    ///
    /// Returns `UnknownUser` if the account does not exist.
    #[instrument(skip_all, fields(username))]
    pub fn update_account(&self, username: &str, changes: &AccountChanges) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        // COALESCE keeps the stored value wherever the change is NULL, so a
        // single statement covers every combination of touched fields.
        let rows = self
            .conn
            .execute(
                "UPDATE account SET
                     status = COALESCE(?1, status),
                     quota = COALESCE(?2, quota),
                     gid = COALESCE(?3, gid),
                     date_modified = ?4
                 WHERE username = ?5",
                params![
                    changes.status.map(|s| s.as_str()),
                    changes.quota,
                    changes.gid,
                    now,
                    username,
                ],
            )
            .map_err(|e| ZaehlwerkError::Database(format!("update account: {e}")))?;

        if rows == 0 {
            return Err(ZaehlwerkError::UnknownUser(username.to_string()));
        }

        info!(username, "account updated");
        Ok(())
    }

    /// Delete an account row. Idempotent.
    #[instrument(skip_all, fields(username))]
    pub fn delete_account(&self, username: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM account WHERE username = ?1", params![username])
            .map_err(|e| ZaehlwerkError::Database(format!("delete account: {e}")))?;

        info!(username, "account deleted");
        Ok(())
    }

    // -- Groups ---------------------------------------------------------------

    /// Insert a new quota group, returning its generated gid.
    #[instrument(skip_all, fields(name))]
    pub fn create_group(&self, name: &str, page_count: Option<i64>) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO quota_group (name, page_count) VALUES (?1, ?2)",
                params![name, page_count],
            )
            .map_err(|e| ZaehlwerkError::Database(format!("insert group: {e}")))?;

        let gid = self.conn.last_insert_rowid();
        info!(name, gid, "group created");
        Ok(gid)
    }

    /// Retrieve a single group by gid. `None` if it does not exist.
    pub fn get_group(&self, gid: i64) -> Result<Option<Group>> {
        self.conn
            .query_row(
                "SELECT gid, name, page_count FROM quota_group WHERE gid = ?1",
                params![gid],
                row_to_group,
            )
            .optional()
            .map_err(|e| ZaehlwerkError::Database(format!("get group: {e}")))
    }

    /// All groups, ordered by gid.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn
            .prepare("SELECT gid, name, page_count FROM quota_group ORDER BY gid ASC")
            .map_err(|e| ZaehlwerkError::Database(format!("prepare list groups: {e}")))?;

        let groups = stmt
            .query_map([], row_to_group)
            .map_err(|e| ZaehlwerkError::Database(format!("query list groups: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ZaehlwerkError::Database(format!("collect groups: {e}")))?;

        Ok(groups)
    }

    /// Apply a partial update to a group.
    #[instrument(skip_all, fields(gid))]
    pub fn update_group(&self, gid: i64, name: Option<&str>, page_count: Option<i64>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE quota_group SET
                     name = COALESCE(?1, name),
                     page_count = COALESCE(?2, page_count)
                 WHERE gid = ?3",
                params![name, page_count, gid],
            )
            .map_err(|e| ZaehlwerkError::Database(format!("update group: {e}")))?;

        if rows == 0 {
            return Err(ZaehlwerkError::Database(format!("group {gid} not found")));
        }
        Ok(())
    }

    /// Delete a group row. Idempotent.
    #[instrument(skip_all, fields(gid))]
    pub fn delete_group(&self, gid: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM quota_group WHERE gid = ?1", params![gid])
            .map_err(|e| ZaehlwerkError::Database(format!("delete group: {e}")))?;
        Ok(())
    }
}

impl zaehlwerk_core::QuotaLedger for AccountStore {
    fn remaining_pages(&self, username: &str) -> Result<i64> {
        let account = self
            .get_account(username)?
            .ok_or_else(|| ZaehlwerkError::UnknownUser(username.to_string()))?;

        debug!(
            username,
            quota = account.quota,
            pages_printed = account.pages_printed,
            "quota looked up"
        );
        Ok(account.remaining())
    }

    fn commit_usage(&mut self, username: &str, pages: u32) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        // Single UPDATE: read-modify-write happens inside SQLite under its
        // write lock, so concurrent commits to one account cannot interleave.
        let rows = self
            .conn
            .execute(
                "UPDATE account
                 SET pages_printed = pages_printed + ?1, date_modified = ?2
                 WHERE username = ?3",
                params![i64::from(pages), now, username],
            )
            .map_err(|e| ZaehlwerkError::Database(format!("commit usage: {e}")))?;

        if rows == 0 {
            return Err(ZaehlwerkError::AccountingConflict(format!(
                "account {username} vanished between quota check and commit"
            )));
        }

        info!(username, pages, "usage committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Map a SQLite row to an `Account`.
///
/// Column indices must match the SELECT order used in the query methods above.
fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let username: String = row.get(0)?;
    let gid: Option<i64> = row.get(1)?;
    let status_str: String = row.get(2)?;
    let quota: i64 = row.get(3)?;
    let pages_printed: i64 = row.get(4)?;
    let date_added_str: String = row.get(5)?;
    let date_modified_str: Option<String> = row.get(6)?;

    let status = AccountStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown account status {status_str:?}").into(),
        )
    })?;

    let date_added: DateTime<Utc> = DateTime::parse_from_rfc3339(&date_added_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let date_modified = match date_modified_str {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
        ),
        None => None,
    };

    Ok(Account {
        username,
        gid,
        status,
        quota,
        pages_printed,
        date_added,
        date_modified,
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        gid: row.get(0)?,
        name: row.get(1)?,
        page_count: row.get(2)?,
    })
}
