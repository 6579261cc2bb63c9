// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Runs every registered check against one opened binary on a bounded worker
//! pool and assembles the report in registration order.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::json;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CheckContext, CheckRegistry, CheckResult, ComplianceCheck, Outcome, FORMAT_UNAVAILABLE};
use crate::binary::{Binary, InputError};
use crate::policy::Policy;
use crate::report::ComplianceReport;

/// Default size of the worker pool.
pub const DEFAULT_JOBS: usize = 4;

/// Cooperative cancellation: a shared flag plus an optional deadline.
///
/// In-flight checks always finish; checks not yet started are skipped.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Request cancellation. Clones share the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Executes a registry against binaries. Built per invocation.
pub struct CheckRunner<'a> {
    registry: &'a CheckRegistry,
    policy: &'a Policy,
    jobs: usize,
    cancellation: Cancellation,
    evaluated_at: Option<DateTime<Utc>>,
}

impl<'a> CheckRunner<'a> {
    #[must_use]
    pub fn new(registry: &'a CheckRegistry, policy: &'a Policy) -> Self {
        Self {
            registry,
            policy,
            jobs: DEFAULT_JOBS,
            cancellation: Cancellation::default(),
            evaluated_at: None,
        }
    }

    /// Worker pool size; values below one are raised to one.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Fix the reference time used for certificate validity and the report timestamp.
    #[must_use]
    pub fn with_evaluation_time(mut self, at: DateTime<Utc>) -> Self {
        self.evaluated_at = Some(at);
        self
    }

    /// Open the binary at `path` and run all checks against it.
    ///
    /// # Errors
    /// Returns an `InputError` if the binary cannot be opened. This is the only
    /// failure; malformed content still yields a report.
    pub fn run_all(&self, path: &Path) -> Result<ComplianceReport, InputError> {
        let binary = Binary::open(path)?;
        Ok(self.run(&binary))
    }

    /// Run all checks against an already opened binary.
    #[must_use]
    pub fn run(&self, binary: &Binary) -> ComplianceReport {
        let started = Instant::now();
        let evaluated_at = self.evaluated_at.unwrap_or_else(Utc::now);
        let ctx = CheckContext::new(binary, self.policy, evaluated_at);

        let slots = self.execute_all(&ctx);
        let partial = slots.iter().any(Option::is_none);
        if partial {
            warn!(
                skipped = slots.iter().filter(|s| s.is_none()).count(),
                "Run cancelled before all checks started"
            );
        }
        let results: Vec<CheckResult> = slots.into_iter().flatten().collect();
        let report = ComplianceReport::new(
            binary,
            evaluated_at,
            results,
            started.elapsed(),
            partial,
        );
        info!(
            path = %binary.path().display(),
            total = report.total_checks(),
            passed = report.passed_checks(),
            failed = report.failed_checks(),
            partial,
            "Compliance run completed"
        );
        report
    }

    /// One slot per registered check, in registration order. A slot stays
    /// `None` when its check was skipped by cancellation.
    fn execute_all(&self, ctx: &CheckContext<'_>) -> Vec<Option<CheckResult>> {
        let execute = |check: &Box<dyn ComplianceCheck>| {
            if self.cancellation.is_cancelled() {
                return None;
            }
            Some(execute_isolated(check.as_ref(), ctx))
        };
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("check-worker-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| self.registry.checks().par_iter().map(execute).collect()),
            Err(e) => {
                warn!(error = %e, "Failed to build worker pool, running checks sequentially");
                self.registry.checks().iter().map(execute).collect()
            }
        }
    }
}

/// Run one check, converting errors, panics and a missing descriptor into a
/// failing result so siblings are never affected.
fn execute_isolated(check: &dyn ComplianceCheck, ctx: &CheckContext<'_>) -> CheckResult {
    let started = Instant::now();
    let outcome = match ctx.binary().descriptor() {
        Err(e) if check.requires_descriptor() => {
            Outcome::fail(FORMAT_UNAVAILABLE).with_metadata(json!({ "format_error": e.to_string() }))
        }
        _ => match panic::catch_unwind(AssertUnwindSafe(|| check.execute(ctx))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Outcome::fail(e.to_string()),
            Err(payload) => Outcome::fail(format!("check panicked: {}", panic_message(&*payload))),
        },
    };
    let result = CheckResult::new(check, outcome, started.elapsed());
    debug!(
        check = result.check_id,
        status = ?result.status,
        elapsed_ms = result.duration.as_millis(),
        "Check finished"
    );
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
