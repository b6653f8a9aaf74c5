// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Account and group administration commands.
//
// Each command returns the text it wants on stdout; `main` owns the actual
// printing and exit codes, which keeps these testable against an in-memory
// store.

use zaehlwerk_core::error::Result;
use zaehlwerk_core::types::{Account, AccountStatus};
use zaehlwerk_ledger::{AccountChanges, AccountStore};

// -- Accounts ----------------------------------------------------------------

pub fn account_create(
    store: &AccountStore,
    username: &str,
    status: AccountStatus,
    quota: i64,
    gid: Option<i64>,
) -> Result<String> {
    store.create_account(&Account::new(username, status, quota, gid))?;
    Ok(format!("Successfully created account {username}."))
}

pub fn account_get(store: &AccountStore, username: &str) -> Result<String> {
    match store.get_account(username)? {
        Some(account) => Ok(serde_json::to_string_pretty(&account)?),
        None => Ok(format!("Account {username} not found!")),
    }
}

pub fn account_list(store: &AccountStore) -> Result<String> {
    let accounts = store.list_accounts()?;
    Ok(serde_json::to_string_pretty(&accounts)?)
}

/// Work out which fields actually differ from the stored row, so an update
/// only touches (and only reports) real changes.
pub fn account_diff(
    existing: &Account,
    status: Option<AccountStatus>,
    quota: Option<i64>,
    gid: Option<i64>,
) -> AccountChanges {
    AccountChanges {
        status: status.filter(|s| *s != existing.status),
        quota: quota.filter(|q| *q != existing.quota),
        gid: gid.filter(|g| Some(*g) != existing.gid),
    }
}

pub fn account_update(
    store: &AccountStore,
    username: &str,
    status: Option<AccountStatus>,
    quota: Option<i64>,
    gid: Option<i64>,
) -> Result<String> {
    let Some(existing) = store.get_account(username)? else {
        return Ok(format!("Account {username} not found!"));
    };

    let changes = account_diff(&existing, status, quota, gid);
    if changes.is_empty() {
        return Ok("No changes to be made, so not attempting update.".to_string());
    }

    store.update_account(username, &changes)?;

    let mut lines = vec![format!("Account {username} updated successfully."), "Details:".to_string()];
    if let Some(status) = changes.status {
        lines.push(format!("  status changed from {} to {}", existing.status, status));
    }
    if let Some(quota) = changes.quota {
        lines.push(format!("  quota changed from {} to {}", existing.quota, quota));
    }
    if let Some(gid) = changes.gid {
        let old = existing
            .gid
            .map_or_else(|| "none".to_string(), |g| g.to_string());
        lines.push(format!("  gid changed from {old} to {gid}"));
    }
    Ok(lines.join("\n"))
}

pub fn account_delete(store: &AccountStore, username: &str) -> Result<String> {
    store.delete_account(username)?;
    Ok(format!("Account {username} deleted successfully."))
}

// -- Groups ------------------------------------------------------------------

pub fn group_create(store: &AccountStore, name: &str, page_count: Option<i64>) -> Result<String> {
    let gid = store.create_group(name, page_count)?;
    Ok(format!("Successfully created group {name} with gid {gid}."))
}

pub fn group_get(store: &AccountStore, gid: i64) -> Result<String> {
    match store.get_group(gid)? {
        Some(group) => Ok(serde_json::to_string_pretty(&group)?),
        None => Ok(format!("Group {gid} not found!")),
    }
}

pub fn group_list(store: &AccountStore) -> Result<String> {
    let groups = store.list_groups()?;
    Ok(serde_json::to_string_pretty(&groups)?)
}

pub fn group_update(
    store: &AccountStore,
    gid: i64,
    name: Option<&str>,
    page_count: Option<i64>,
) -> Result<String> {
    if name.is_none() && page_count.is_none() {
        return Ok("No changes to be made, so not attempting update.".to_string());
    }
    store.update_group(gid, name, page_count)?;
    Ok(format!("Group {gid} updated successfully."))
}

pub fn group_delete(store: &AccountStore, gid: i64) -> Result<String> {
    store.delete_group(gid)?;
    Ok(format!("Group {gid} deleted successfully."))
}
