//! Run-wide result aggregation
//!
//! Collects finalized parser summaries keyed by test name and answers the
//! run-level questions: totals, good/bad file counts, wall-clock bounds,
//! and the one-line verdict.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parse::ParserSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pass,
    Fail,
    NoTests,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pass => write!(f, "PASS"),
            RunStatus::Fail => write!(f, "FAIL"),
            RunStatus::NoTests => write!(f, "NOTESTS"),
        }
    }
}

#[derive(Default)]
pub struct Aggregator {
    names: Vec<String>,
    summaries: HashMap<String, ParserSummary>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    start_instant: Option<Instant>,
    elapsed: Duration,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the beginning of the run.
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.start_instant = Some(Instant::now());
    }

    /// Mark the end of the run.
    pub fn stop(&mut self) {
        self.stopped_at = Some(Utc::now());
        if let Some(start) = self.start_instant {
            self.elapsed = start.elapsed();
        }
    }

    /// Record one finalized parser under its test name.
    pub fn add(&mut self, name: impl Into<String>, summary: ParserSummary) -> Result<()> {
        let name = name.into();
        if self.summaries.contains_key(&name) {
            return Err(Error::Internal(format!(
                "already have results for {name}"
            )));
        }
        self.names.push(name.clone());
        self.summaries.insert(name, summary);
        Ok(())
    }

    /// Test names in the order they were added.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn summary(&self, name: &str) -> Option<&ParserSummary> {
        self.summaries.get(name)
    }

    pub fn files(&self) -> usize {
        self.names.len()
    }

    pub fn total(&self) -> usize {
        self.summaries.values().map(|s| s.tests_run).sum()
    }

    pub fn passed(&self) -> usize {
        self.summaries.values().map(|s| s.passed).sum()
    }

    pub fn failed(&self) -> usize {
        self.summaries.values().map(|s| s.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.summaries.values().map(|s| s.skipped).sum()
    }

    pub fn todo(&self) -> usize {
        self.summaries.values().map(|s| s.todo).sum()
    }

    /// TODO tests that unexpectedly passed.
    pub fn bonus(&self) -> usize {
        self.summaries.values().map(|s| s.todo_passed).sum()
    }

    /// Files whose parser reported trouble of any kind.
    pub fn bad(&self) -> usize {
        self.summaries.values().filter(|s| s.has_problems).count()
    }

    pub fn good(&self) -> usize {
        self.files() - self.bad()
    }

    pub fn bailed_out(&self) -> bool {
        self.summaries.values().any(|s| s.bailed_out)
    }

    /// Hard failures: failed tests, parse errors, bad exits.
    pub fn has_errors(&self) -> bool {
        self.bad() > 0
    }

    /// Anything a developer should look at, including unexpected TODO
    /// passes.
    pub fn has_problems(&self) -> bool {
        self.has_errors() || self.bonus() > 0
    }

    pub fn status(&self) -> RunStatus {
        if self.has_errors() || self.total() != self.passed() {
            RunStatus::Fail
        } else if self.total() > 0 {
            RunStatus::Pass
        } else {
            RunStatus::NoTests
        }
    }

    /// The one-line verdict for the end of a run.
    pub fn description(&self) -> String {
        format!("Result: {}", self.status())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
