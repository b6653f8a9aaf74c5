// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zählwerk — page-accounting gateway for CUPS backends.
//
// Installed in the scheduler's backend directory with the real device URI
// wrapped as `zaehlwerk://<real-uri>`. Each invocation handles exactly one
// job: count pages, check the user's quota, and only then hand the job to
// the real backend, committing usage once delivery is confirmed.

mod diag;
mod dispatch;
mod forwarder;
mod job;

use tracing::error;

use zaehlwerk_core::GatewayConfig;
use zaehlwerk_document::PdfPageCounter;
use zaehlwerk_ledger::AccountStore;

use dispatch::Dispatcher;
use forwarder::PrivilegedForwarder;
use job::JobDescriptor;

fn main() {
    diag::init();
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(run(args));
}

fn run(args: Vec<String>) -> i32 {
    // Usage validation first; a malformed invocation must have no side
    // effects, so neither config nor database is touched before this point.
    let mut job = match JobDescriptor::from_invocation(args, std::env::vars_os()) {
        Ok(job) => job,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    let config = match GatewayConfig::discover() {
        Ok(Some(config)) => config,
        Ok(None) => GatewayConfig::default(),
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    let mut ledger = match AccountStore::open(&config.database.path) {
        Ok(store) => store,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    let counter = PdfPageCounter;
    let forwarder = PrivilegedForwarder;
    let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);

    if let Err(err) = &result {
        error!("{err}");
    }
    dispatch::exit_status(&result)
}
