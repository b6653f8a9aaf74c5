// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The dispatch pipeline: content gate, page count, quota gate, privileged
// forward, accounting commit.
//
// Accounting invariant: `commit_usage` runs if and only if the forward step
// confirmed delivery. Never before the forward, never after a partial or
// failed one. This is what keeps "billed" and "physically printed" the same
// set of jobs.

use tracing::{error, info};

use zaehlwerk_core::error::{Result, ZaehlwerkError};
use zaehlwerk_core::traits::{PageCounter, QuotaLedger};

use crate::forwarder::{DeviceForwarder, ForwardOutcome};
use crate::job::{JobDescriptor, SUPPORTED_CONTENT_TYPE};

/// Orchestrates one job through the accounting pipeline.
pub struct Dispatcher<'a, C, L, F> {
    counter: &'a C,
    ledger: &'a mut L,
    forwarder: &'a F,
}

impl<'a, C, L, F> Dispatcher<'a, C, L, F>
where
    C: PageCounter,
    L: QuotaLedger,
    F: DeviceForwarder,
{
    pub fn new(counter: &'a C, ledger: &'a mut L, forwarder: &'a F) -> Self {
        Self {
            counter,
            ledger,
            forwarder,
        }
    }

    /// Run the pipeline for one job.
    ///
    /// `Ok` carries the outcome of a job that reached the forward step; the
    /// dispatcher maps that outcome (and every earlier terminal error) to
    /// the process exit status, nothing else does.
    pub fn dispatch(&mut self, job: &mut JobDescriptor) -> Result<ForwardOutcome> {
        // Content gate comes first: nothing unaccountable may touch the
        // ledger, not even for a read.
        let content_type = job.env.content_type.as_deref().unwrap_or("");
        if content_type != SUPPORTED_CONTENT_TYPE {
            return Err(ZaehlwerkError::UnsupportedFormat(content_type.to_string()));
        }

        let mut payload = job.spool()?;
        let pages = self.counter.count_pages(&payload.data)?;
        job.set_page_count(pages);

        if pages == 0 {
            return Err(ZaehlwerkError::EmptyJob);
        }

        let remaining = self.ledger.remaining_pages(&job.user)?;
        if remaining < i64::from(pages) {
            return Err(ZaehlwerkError::QuotaExceeded {
                user: job.user.clone(),
                remaining,
                requested: pages,
            });
        }

        info!(
            "job {} for {} is {pages} pages, {remaining} allowed; forwarding",
            job.job_id, job.user
        );
        let outcome = self.forwarder.forward(job, &mut payload)?;

        if outcome.is_success() {
            info!("adding {pages} pages to accounting for user {}", job.user);
            if let Err(err) = self.ledger.commit_usage(&job.user, pages) {
                // The job physically printed; all we can do is say so loudly.
                error!(
                    "job {} printed but was NOT billed to {}: {err}",
                    job.job_id, job.user
                );
            }
        } else {
            info!("delivery not confirmed, no pages accounted for {}", job.user);
        }

        Ok(outcome)
    }
}

/// Map a finished dispatch to the process exit status.
///
/// 0 only for a forwarded-and-confirmed job; 1 for every terminal error in
/// the taxonomy; forward outcomes pass their own classification through.
pub fn exit_status(result: &Result<ForwardOutcome>) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::ffi::OsString;

    use crate::job::SpooledPayload;

    // -- Test doubles --------------------------------------------------------

    /// Counter returning a fixed page count, recording whether it ran.
    struct FixedCounter {
        pages: u32,
        invoked: RefCell<bool>,
    }

    impl FixedCounter {
        fn new(pages: u32) -> Self {
            Self {
                pages,
                invoked: RefCell::new(false),
            }
        }
    }

    impl PageCounter for FixedCounter {
        fn count_pages(&self, _data: &[u8]) -> Result<u32> {
            *self.invoked.borrow_mut() = true;
            Ok(self.pages)
        }
    }

    /// In-memory ledger with one account.
    struct MemoryLedger {
        username: String,
        quota: i64,
        pages_printed: i64,
        commits: Vec<u32>,
    }

    impl MemoryLedger {
        fn new(username: &str, quota: i64, pages_printed: i64) -> Self {
            Self {
                username: username.to_string(),
                quota,
                pages_printed,
                commits: Vec::new(),
            }
        }
    }

    impl QuotaLedger for MemoryLedger {
        fn remaining_pages(&self, username: &str) -> Result<i64> {
            if username != self.username {
                return Err(ZaehlwerkError::UnknownUser(username.to_string()));
            }
            Ok(self.quota - self.pages_printed)
        }

        fn commit_usage(&mut self, username: &str, pages: u32) -> Result<()> {
            if username != self.username {
                return Err(ZaehlwerkError::AccountingConflict(username.to_string()));
            }
            self.pages_printed += i64::from(pages);
            self.commits.push(pages);
            Ok(())
        }
    }

    /// Ledger that must never be touched.
    struct UntouchableLedger;

    impl QuotaLedger for UntouchableLedger {
        fn remaining_pages(&self, _username: &str) -> Result<i64> {
            panic!("ledger read on a path that must not reach the ledger");
        }

        fn commit_usage(&mut self, _username: &str, _pages: u32) -> Result<()> {
            panic!("ledger write on a path that must not reach the ledger");
        }
    }

    /// Forwarder returning a scripted outcome, recording whether it ran.
    struct ScriptedForwarder {
        outcome: ForwardOutcome,
        invoked: RefCell<bool>,
    }

    impl ScriptedForwarder {
        fn new(outcome: ForwardOutcome) -> Self {
            Self {
                outcome,
                invoked: RefCell::new(false),
            }
        }
    }

    impl DeviceForwarder for ScriptedForwarder {
        fn forward(&self, _job: &JobDescriptor, _payload: &mut SpooledPayload) -> Result<ForwardOutcome> {
            *self.invoked.borrow_mut() = true;
            Ok(self.outcome)
        }
    }

    // -- Fixtures ------------------------------------------------------------

    /// A job descriptor whose payload is a real temp file (contents are
    /// irrelevant; the counter is scripted).
    fn pdf_job(dir: &tempfile::TempDir, user: &str) -> JobDescriptor {
        let path = dir.path().join("payload.pdf");
        std::fs::write(&path, b"%PDF-1.5 test payload").expect("write payload");

        let args: Vec<String> = ["zaehlwerk", "42", user, "report", "1", "none"]
            .iter()
            .map(|s| s.to_string())
            .chain([path.to_str().unwrap().to_string()])
            .collect();
        let env = vec![(
            OsString::from("CONTENT_TYPE"),
            OsString::from("application/pdf"),
        )];
        JobDescriptor::from_invocation(args, env).expect("descriptor")
    }

    fn job_with_content_type(dir: &tempfile::TempDir, content_type: &str) -> JobDescriptor {
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"payload").expect("write payload");

        let args: Vec<String> = ["zaehlwerk", "42", "alice", "report", "1", "none"]
            .iter()
            .map(|s| s.to_string())
            .chain([path.to_str().unwrap().to_string()])
            .collect();
        let env = vec![(OsString::from("CONTENT_TYPE"), OsString::from(content_type))];
        JobDescriptor::from_invocation(args, env).expect("descriptor")
    }

    // -- Tests ---------------------------------------------------------------

    #[test]
    fn wrong_content_type_never_reaches_counter_or_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job_with_content_type(&dir, "text/plain");

        let counter = FixedCounter::new(3);
        let mut ledger = UntouchableLedger;
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let err = Dispatcher::new(&counter, &mut ledger, &forwarder)
            .dispatch(&mut job)
            .unwrap_err();

        assert!(matches!(err, ZaehlwerkError::UnsupportedFormat(t) if t == "text/plain"));
        assert!(!*counter.invoked.borrow());
        assert!(!*forwarder.invoked.borrow());
    }

    #[test]
    fn missing_content_type_is_fatal_before_the_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"payload").expect("write");
        let args: Vec<String> = ["zaehlwerk", "42", "alice", "t", "1", "", path.to_str().unwrap()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut job = JobDescriptor::from_invocation(args, Vec::new()).expect("descriptor");

        let counter = FixedCounter::new(3);
        let mut ledger = UntouchableLedger;
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let err = Dispatcher::new(&counter, &mut ledger, &forwarder)
            .dispatch(&mut job)
            .unwrap_err();
        assert!(matches!(err, ZaehlwerkError::UnsupportedFormat(_)));
    }

    #[test]
    fn empty_job_touches_neither_ledger_nor_forwarder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");

        let counter = FixedCounter::new(0);
        let mut ledger = UntouchableLedger;
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let err = Dispatcher::new(&counter, &mut ledger, &forwarder)
            .dispatch(&mut job)
            .unwrap_err();

        assert!(matches!(err, ZaehlwerkError::EmptyJob));
        assert!(!*forwarder.invoked.borrow());
        assert_eq!(job.page_count(), Some(0));
    }

    #[test]
    fn unknown_user_is_terminal_with_no_accounting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "ghost");

        let counter = FixedCounter::new(3);
        let mut ledger = MemoryLedger::new("alice", 10, 0);
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let err = Dispatcher::new(&counter, &mut ledger, &forwarder)
            .dispatch(&mut job)
            .unwrap_err();

        assert!(matches!(err, ZaehlwerkError::UnknownUser(u) if u == "ghost"));
        assert!(!*forwarder.invoked.borrow());
        assert!(ledger.commits.is_empty());
    }

    #[test]
    fn quota_exceeded_skips_forward_and_accounting() {
        // Scenario A: 3-page job, quota 10, 8 printed, remaining 2 < 3.
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");

        let counter = FixedCounter::new(3);
        let mut ledger = MemoryLedger::new("alice", 10, 8);
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);

        assert!(matches!(
            result,
            Err(ZaehlwerkError::QuotaExceeded { remaining: 2, requested: 3, .. })
        ));
        assert_eq!(exit_status(&result), 1);
        assert!(!*forwarder.invoked.borrow());
        assert_eq!(ledger.pages_printed, 8);
    }

    #[test]
    fn successful_forward_commits_exactly_once() {
        // Scenario B: 3-page job, quota 10, 5 printed, remaining 5 >= 3.
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");

        let counter = FixedCounter::new(3);
        let mut ledger = MemoryLedger::new("alice", 10, 5);
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);

        assert!(matches!(result, Ok(ForwardOutcome::Exited(0))));
        assert_eq!(exit_status(&result), 0);
        assert!(*forwarder.invoked.borrow());
        assert_eq!(ledger.pages_printed, 8);
        assert_eq!(ledger.commits, vec![3]);
    }

    #[test]
    fn job_exactly_at_remaining_quota_is_forwarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");

        let counter = FixedCounter::new(5);
        let mut ledger = MemoryLedger::new("alice", 10, 5);
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);
        assert!(matches!(result, Ok(ForwardOutcome::Exited(0))));
        assert_eq!(ledger.pages_printed, 10);
    }

    #[test]
    fn failed_forward_commits_nothing() {
        for outcome in [
            ForwardOutcome::Exited(4),
            ForwardOutcome::Signaled(9),
            ForwardOutcome::Killed,
            ForwardOutcome::Abnormal,
        ] {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut job = pdf_job(&dir, "alice");

            let counter = FixedCounter::new(3);
            let mut ledger = MemoryLedger::new("alice", 10, 5);
            let forwarder = ScriptedForwarder::new(outcome);

            let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);

            assert_eq!(result.as_ref().ok(), Some(&outcome));
            assert!(ledger.commits.is_empty(), "no commit after {outcome}");
            assert_eq!(ledger.pages_printed, 5);
        }
    }

    #[test]
    fn forward_outcomes_surface_their_own_exit_codes() {
        assert_eq!(exit_status(&Ok(ForwardOutcome::Exited(4))), 4);
        assert_eq!(exit_status(&Ok(ForwardOutcome::Signaled(15))), 143);
        assert_eq!(exit_status(&Ok(ForwardOutcome::Killed)), 1);
        assert_eq!(exit_status(&Ok(ForwardOutcome::Abnormal)), 255);
        assert_eq!(exit_status(&Err(ZaehlwerkError::EmptyJob)), 1);
    }

    #[test]
    fn quota_scenarios_hold_against_the_sqlite_store() {
        use zaehlwerk_core::types::{Account, AccountStatus};
        use zaehlwerk_ledger::AccountStore;

        let mut store = AccountStore::open_in_memory().expect("open in-memory db");
        let counter = FixedCounter::new(3);
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        // Scenario A: quota 10, 8 printed, 3-page job. Remaining 2 < 3.
        let mut alice = Account::new("alice", AccountStatus::UsingPersonalQuota, 10, None);
        alice.pages_printed = 8;
        store.create_account(&alice).expect("create");

        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");
        let result = Dispatcher::new(&counter, &mut store, &forwarder).dispatch(&mut job);
        assert!(matches!(result, Err(ZaehlwerkError::QuotaExceeded { .. })));
        assert_eq!(exit_status(&result), 1);
        let row = store.get_account("alice").expect("get").expect("found");
        assert_eq!(row.pages_printed, 8);

        // Scenario B: same job, 5 printed. Remaining 5 >= 3; billed to 8.
        store.delete_account("alice").expect("delete");
        alice.pages_printed = 5;
        store.create_account(&alice).expect("recreate");

        let mut job = pdf_job(&dir, "alice");
        let result = Dispatcher::new(&counter, &mut store, &forwarder).dispatch(&mut job);
        assert!(matches!(result, Ok(ForwardOutcome::Exited(0))));
        assert_eq!(exit_status(&result), 0);
        let row = store.get_account("alice").expect("get").expect("found");
        assert_eq!(row.pages_printed, 8);
    }

    #[test]
    fn accounting_conflict_after_delivery_still_exits_zero() {
        // The account vanishes between quota check and commit; the job
        // printed, so the scheduler must not re-deliver.
        struct VanishingLedger;
        impl QuotaLedger for VanishingLedger {
            fn remaining_pages(&self, _u: &str) -> Result<i64> {
                Ok(100)
            }
            fn commit_usage(&mut self, u: &str, _p: u32) -> Result<()> {
                Err(ZaehlwerkError::AccountingConflict(u.to_string()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = pdf_job(&dir, "alice");

        let counter = FixedCounter::new(3);
        let mut ledger = VanishingLedger;
        let forwarder = ScriptedForwarder::new(ForwardOutcome::Exited(0));

        let result = Dispatcher::new(&counter, &mut ledger, &forwarder).dispatch(&mut job);
        assert!(matches!(result, Ok(ForwardOutcome::Exited(0))));
        assert_eq!(exit_status(&result), 0);
    }
}
