// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Zählwerk.

use thiserror::Error;

/// Top-level error type for all Zählwerk operations.
#[derive(Debug, Error)]
pub enum ZaehlwerkError {
    // -- Invocation errors --
    #[error("usage: {0} job-id user job-title nr-copies options [file]")]
    Usage(String),

    #[error("print data not available: {0}")]
    DataUnavailable(String),

    // -- Accounting gate --
    #[error("content type {0:?} is not supported (only application/pdf can be accounted for)")]
    UnsupportedFormat(String),

    #[error("job data has no content that can be printed")]
    EmptyJob,

    #[error("no account exists for user {0}")]
    UnknownUser(String),

    #[error("job exceeds the print quota of {user} ({remaining} pages left, job is {requested} pages)")]
    QuotaExceeded {
        user: String,
        remaining: i64,
        requested: u32,
    },

    // -- Forwarding --
    #[error("device URI {0:?} is not wrapped with the zaehlwerk:// scheme")]
    DeviceUri(String),

    #[error("failed to hand job to the device backend: {0}")]
    Forward(String),

    #[error("privilege transition failed: {0}")]
    Privilege(String),

    // -- Ledger / persistence --
    #[error("accounting update lost: {0}")]
    AccountingConflict(String),

    #[error("database error: {0}")]
    Database(String),

    // -- Configuration / ambient --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ZaehlwerkError>;
