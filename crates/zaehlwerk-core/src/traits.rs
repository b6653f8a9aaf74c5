// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator traits consumed by the dispatch pipeline.
//
// The dispatcher only ever talks to the page counter and the quota ledger
// through these seams, so both can be swapped for in-memory doubles in
// tests and for alternative stores later.

use crate::error::Result;

/// Counts billable units in a raw job payload.
pub trait PageCounter {
    /// Number of pages in `data`.
    ///
    /// Returns `ZaehlwerkError::UnsupportedFormat` when the bytes are not
    /// the supported document type. A zero count is a valid result, not an
    /// error; the dispatcher owns the empty-job decision.
    fn count_pages(&self, data: &[u8]) -> Result<u32>;
}

/// Persistent per-account page accounting.
pub trait QuotaLedger {
    /// Pages `username` may still print (quota minus pages printed).
    ///
    /// Returns `ZaehlwerkError::UnknownUser` if no such account exists.
    fn remaining_pages(&self, username: &str) -> Result<i64>;

    /// Atomically add `pages` to the account's printed counter and bump its
    /// modification timestamp.
    ///
    /// Must fail with `ZaehlwerkError::AccountingConflict` — never silently —
    /// if the account disappeared between the quota check and this commit.
    /// Serializing concurrent commits to the same account is the ledger's
    /// job, not the caller's.
    fn commit_usage(&mut self, username: &str, pages: u32) -> Result<()>;
}
