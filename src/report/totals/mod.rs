// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Pass/fail counts over a result list.

use rayon::prelude::*;
use serde::Serialize;
use std::ops::Add;

use crate::checks::{CheckResult, CheckStatus};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ReportTotals {
    pub(crate) total_checks: usize,
    pub(crate) passed_checks: usize,
    pub(crate) failed_checks: usize,
}

impl ReportTotals {
    pub(crate) fn calculate(results: &[CheckResult]) -> Self {
        results
            .par_iter()
            .fold(ReportTotals::default, |mut totals, result| {
                match result.status {
                    CheckStatus::Pass => totals.passed_checks += 1,
                    CheckStatus::Fail => totals.failed_checks += 1,
                }
                totals.total_checks += 1;
                totals
            })
            .reduce(ReportTotals::default, |a, b| a + b)
    }
}

impl Add for ReportTotals {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let passed_checks = self.passed_checks + other.passed_checks;
        let failed_checks = self.failed_checks + other.failed_checks;
        Self {
            total_checks: passed_checks + failed_checks,
            passed_checks,
            failed_checks,
        }
    }
}
