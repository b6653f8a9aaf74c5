// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// zaehlwerk-admin — account and quota-group administration.
//
// Operates on the same SQLite store the gateway bills against. The database
// file and schema are bootstrapped on first use.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use zaehlwerk_core::GatewayConfig;
use zaehlwerk_core::error::Result;
use zaehlwerk_core::types::AccountStatus;
use zaehlwerk_ledger::AccountStore;

fn parse_status(s: &str) -> std::result::Result<AccountStatus, String> {
    AccountStatus::parse(s)
        .ok_or_else(|| format!("invalid status {s:?} (expected disabled, personal, or group)"))
}

#[derive(Parser, Debug)]
#[command(
    name = "zaehlwerk-admin",
    about = "Administer Zählwerk print accounts and quota groups",
    version
)]
struct Cli {
    /// Path to the gateway config file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Account database path (overrides the config file).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Various utilities for working with accounts.
    #[command(subcommand)]
    Account(AccountCmd),
    /// Various utilities for working with quota groups.
    #[command(subcommand)]
    Group(GroupCmd),
}

#[derive(Subcommand, Debug)]
enum AccountCmd {
    /// Create a new account.
    Create {
        username: String,
        #[arg(long, default_value = "personal", value_parser = parse_status)]
        status: AccountStatus,
        #[arg(long, default_value_t = 0)]
        quota: i64,
        #[arg(long)]
        gid: Option<i64>,
    },
    /// Display all account information.
    Get { username: String },
    /// List every account.
    List,
    /// Update an account with relevant attributes.
    Update {
        username: String,
        #[arg(long, value_parser = parse_status)]
        status: Option<AccountStatus>,
        #[arg(long)]
        quota: Option<i64>,
        #[arg(long)]
        gid: Option<i64>,
    },
    /// Remove an account and all associated data.
    Delete { username: String },
}

#[derive(Subcommand, Debug)]
enum GroupCmd {
    /// Create a new quota group.
    Create {
        name: String,
        #[arg(long)]
        page_count: Option<i64>,
    },
    /// Display all group information.
    Get { gid: i64 },
    /// List every group.
    List,
    /// Update a group with relevant attributes.
    Update {
        gid: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        page_count: Option<i64>,
    },
    /// Remove a quota group.
    Delete { gid: i64 },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(if cli.verbose {
            "debug"
        } else {
            "warn"
        }))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let store = open_store(&cli)?;

    match cli.command {
        Command::Account(cmd) => match cmd {
            AccountCmd::Create { username, status, quota, gid } => {
                commands::account_create(&store, &username, status, quota, gid)
            }
            AccountCmd::Get { username } => commands::account_get(&store, &username),
            AccountCmd::List => commands::account_list(&store),
            AccountCmd::Update { username, status, quota, gid } => {
                commands::account_update(&store, &username, status, quota, gid)
            }
            AccountCmd::Delete { username } => commands::account_delete(&store, &username),
        },
        Command::Group(cmd) => match cmd {
            GroupCmd::Create { name, page_count } => {
                commands::group_create(&store, &name, page_count)
            }
            GroupCmd::Get { gid } => commands::group_get(&store, gid),
            GroupCmd::List => commands::group_list(&store),
            GroupCmd::Update { gid, name, page_count } => {
                commands::group_update(&store, gid, name.as_deref(), page_count)
            }
            GroupCmd::Delete { gid } => commands::group_delete(&store, gid),
        },
    }
}

/// Resolve the database path (flag beats config file beats default) and open
/// the store, bootstrapping file and schema if needed.
fn open_store(cli: &Cli) -> Result<AccountStore> {
    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::discover()?.unwrap_or_default(),
    };

    let path = cli
        .database
        .clone()
        .unwrap_or(config.database.path);

    debug!("using account database {}", path.display());
    AccountStore::open(&path)
}
