// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway configuration.
//
// Loaded once at startup and passed down explicitly; nothing in the pipeline
// reads configuration ambiently after this point.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZaehlwerkError};

/// Paths probed, in order, when no explicit config file is given.
const SEARCH_PATHS: &[&str] = &["./zaehlwerk.toml", "/etc/zaehlwerk.toml"];

/// Top-level gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub database: DatabaseConfig,
}

/// Where the account store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file holding accounts and groups.
    pub path: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: PathBuf::from("/var/lib/zaehlwerk/accounts.db"),
            },
        }
    }
}

impl GatewayConfig {
    /// Parse a specific TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ZaehlwerkError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ZaehlwerkError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Probe the standard search paths and load the first config file found.
    ///
    /// Returns `None` if no file exists at any search path.
    pub fn discover() -> Result<Option<Self>> {
        Self::discover_in(SEARCH_PATHS)
    }

    /// Load the first existing candidate, probed in order. Later candidates
    /// are not consulted once one exists, even if it fails to parse.
    pub fn discover_in<P: AsRef<Path>>(candidates: &[P]) -> Result<Option<Self>> {
        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::load(candidate).map(Some);
            }
        }
        Ok(None)
    }
}
