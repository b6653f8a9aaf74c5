// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zählwerk — persistent account store (the quota ledger).

pub mod store;

pub use store::{AccountChanges, AccountStore};
