// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zählwerk — Core types, errors, and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::GatewayConfig;
pub use error::ZaehlwerkError;
pub use traits::{PageCounter, QuotaLedger};
pub use types::*;
