// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Zählwerk accounting gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quota policy an account is currently subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Account may not print at all.
    Disabled,
    /// Account is billed against its own quota.
    UsingPersonalQuota,
    /// Account is billed against its group's quota.
    UsingGroupQuota,
}

impl AccountStatus {
    /// Canonical database/CLI representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::UsingPersonalQuota => "USING_PERSONAL_QUOTA",
            Self::UsingGroupQuota => "USING_GROUP_QUOTA",
        }
    }

    /// Parse from the canonical representation or the short CLI spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISABLED" | "disabled" => Some(Self::Disabled),
            "USING_PERSONAL_QUOTA" | "personal" => Some(Self::UsingPersonalQuota),
            "USING_GROUP_QUOTA" | "group" => Some(Self::UsingGroupQuota),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billing identity: a quota ceiling and a monotonically growing
/// consumption counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identity; the scheduler bills jobs by this name.
    pub username: String,
    /// Optional quota group reference.
    pub gid: Option<i64>,
    pub status: AccountStatus,
    /// Page ceiling. `remaining = quota - pages_printed`.
    pub quota: i64,
    /// Pages already billed. Never decreases; only a committed, successfully
    /// forwarded job may increase it.
    pub pages_printed: i64,
    pub date_added: DateTime<Utc>,
    pub date_modified: Option<DateTime<Utc>>,
}

impl Account {
    /// Fresh account with nothing printed yet.
    pub fn new(username: impl Into<String>, status: AccountStatus, quota: i64, gid: Option<i64>) -> Self {
        Self {
            username: username.into(),
            gid,
            status,
            quota,
            pages_printed: 0,
            date_added: Utc::now(),
            date_modified: None,
        }
    }

    /// Pages this account may still print.
    pub fn remaining(&self) -> i64 {
        self.quota - self.pages_printed
    }
}

/// A quota group accounts can be pooled into.
///
/// Group policy resolution is not applied by the gateway itself; the group
/// table exists for the admin tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub gid: i64,
    pub name: String,
    pub page_count: Option<i64>,
}
