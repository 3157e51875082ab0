/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The transaction log a behaviour run produces, and the report the
//! CLI prints after assertions are evaluated (§5 "the transaction log
//! is appended only from the owning worker", §8 invariant 1).

use serde::Serialize;

/// One command/response pair as observed by the client, in the order
/// issued (§8 invariant 1).
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub verb: String,
    pub request: String,
    pub response: String,
}

impl Transaction {
    pub fn new(verb: impl Into<String>, request: impl Into<String>, response: impl Into<String>) -> Self {
        Transaction {
            verb: verb.into(),
            request: request.into(),
            response: response.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{} -> {}", self.request, self.response)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssertionOutcome {
    pub group: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// The terminal outcome of one case run, and the exit code the CLI
/// surface maps it to (§6 "exit codes: 0 success, 1 assertion
/// failure, 2 configuration error, 3 I/O failure").
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub transactions: Vec<Transaction>,
    pub assertions: Vec<AssertionOutcome>,
}

impl CaseReport {
    pub fn new() -> Self {
        CaseReport {
            transactions: Vec::new(),
            assertions: Vec::new(),
        }
    }

    pub fn record(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn last(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

impl Default for CaseReport {
    fn default() -> Self {
        CaseReport::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_one_on_any_failed_assertion() {
        let mut report = CaseReport::new();
        report.assertions.push(AssertionOutcome {
            group: "session".into(),
            passed: true,
            detail: None,
        });
        assert_eq!(report.exit_code(), 0);
        report.assertions.push(AssertionOutcome {
            group: "envelope-0".into(),
            passed: false,
            detail: Some("no match".into()),
        });
        assert_eq!(report.exit_code(), 1);
    }
}
