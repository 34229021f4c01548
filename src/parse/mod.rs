//! TAP parser state machine
//!
//! Drives a [`Grammar`](crate::grammar::Grammar) over a line source and
//! emits [`TapEvent`]s with semantics applied: plan placement, test
//! renumbering, directive bookkeeping, bail-out handling, and running
//! statistics. Malformed TAP is recorded in `parse_errors` and parsing
//! continues: the producer of a TAP stream is usually a test under
//! debugging, and rejecting its output helps nobody.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::grammar::{Directive, Grammar, Token, MIN_EXPLICIT_VERSION};
use crate::source::{ArraySource, FileSource, PushbackSource, TapSource};
use crate::spool::SpoolWriter;

pub mod callbacks;
pub mod result;

pub use callbacks::{CallbackRegistry, EventKind};
pub use result::{TapEvent, TestResult};

/// Where the plan sat relative to the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanPosition {
    NotSeen,
    Leading,
    Trailing,
}

/// Finalized statistics for one parsed stream, cheap to clone and to move
/// across task boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserSummary {
    pub tests_run: usize,
    pub planned: Option<usize>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub todo_passed: usize,
    pub parse_errors: Vec<String>,
    pub exit: Option<i32>,
    pub wait: Option<i32>,
    pub version: u32,
    pub skip_all: bool,
    pub skip_all_reason: Option<String>,
    pub bailed_out: bool,
    pub bailout_reason: Option<String>,
    pub is_good_plan: bool,
    pub has_problems: bool,
    pub elapsed: Duration,
}

impl ParserSummary {
    /// True when every planned test ran and passed cleanly.
    pub fn all_passed(&self) -> bool {
        !self.has_problems
    }
}

pub struct Parser {
    grammar: Grammar,
    source: PushbackSource,
    callbacks: CallbackRegistry,
    spool: Option<SpoolWriter>,

    plan: Option<usize>,
    plan_position: PlanPosition,
    plan_in_middle: bool,
    next_expected: usize,

    tests_run: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
    todo: usize,
    todo_passed: usize,
    parse_errors: Vec<String>,

    skip_all: bool,
    skip_all_reason: Option<String>,
    bailout_reason: Option<String>,

    /// A non-Unknown token has been emitted; a version line is no longer
    /// acceptable.
    started: bool,
    /// The previous substantive event was a test line, so a structured
    /// diagnostic may follow.
    diagnostic_allowed: bool,
    finished: bool,
    is_good_plan: bool,

    exit: Option<i32>,
    wait: Option<i32>,
    started_at: Instant,
    elapsed: Duration,
}

impl Parser {
    pub fn new(source: Box<dyn TapSource>) -> Self {
        Self {
            grammar: Grammar::new(),
            source: PushbackSource::new(source),
            callbacks: CallbackRegistry::new(),
            spool: None,
            plan: None,
            plan_position: PlanPosition::NotSeen,
            plan_in_middle: false,
            next_expected: 1,
            tests_run: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            todo: 0,
            todo_passed: 0,
            parse_errors: Vec::new(),
            skip_all: false,
            skip_all_reason: None,
            bailout_reason: None,
            started: false,
            diagnostic_allowed: false,
            finished: false,
            is_good_plan: false,
            exit: None,
            wait: None,
            started_at: Instant::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Parse a TAP document held in memory.
    pub fn from_str(text: &str) -> Self {
        Self::new(Box::new(ArraySource::from_str(text)))
    }

    /// Parse a TAP file on disk.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Box::new(FileSource::open(path).await?)))
    }

    /// Copy every consumed raw line to `spool` as it is parsed.
    pub fn with_spool(mut self, spool: SpoolWriter) -> Self {
        self.spool = Some(spool);
        self
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Pull the next result, or `None` at end of stream. End is sticky.
    pub async fn next(&mut self) -> Result<Option<TapEvent>> {
        if self.finished {
            return Ok(None);
        }
        if self.bailout_reason.is_some() {
            self.finish(true).await?;
            return Ok(None);
        }

        let Some(line) = self.source.next_line().await? else {
            self.finish(false).await?;
            return Ok(None);
        };

        let token = self.grammar.tokenize(line, &mut self.source).await?;
        if let Some(spool) = &mut self.spool {
            spool.write_line(token.raw())?;
        }

        let event = self.apply(token);
        self.callbacks.dispatch(&event);
        Ok(Some(event))
    }

    /// Apply parser semantics to one token, producing the outgoing event
    /// and updating state.
    fn apply(&mut self, token: Token) -> TapEvent {
        let event = match token {
            Token::Version { version, raw } => self.apply_version(version, raw),
            Token::Plan {
                planned,
                directive,
                explanation,
                raw,
            } => self.apply_plan(planned, directive, explanation, raw),
            Token::Test {
                ok,
                number,
                description,
                directive,
                explanation,
                raw,
            } => self.apply_test(ok, number, description, directive, explanation, raw),
            Token::Bailout { reason, raw } => {
                self.bailout_reason = Some(reason.clone());
                TapEvent::Bailout { reason, raw }
            }
            Token::Comment { text, raw } => TapEvent::Comment { text, raw },
            Token::Yaml {
                payload,
                document,
                raw,
                malformed,
            } => {
                if !self.diagnostic_allowed {
                    self.parse_errors
                        .push("Unexpected structured diagnostic".to_string());
                } else if malformed {
                    self.parse_errors
                        .push("Unable to parse structured diagnostic".to_string());
                }
                TapEvent::Yaml {
                    payload,
                    document,
                    raw,
                }
            }
            Token::Unknown { raw } => TapEvent::Unknown { raw },
        };

        match &event {
            TapEvent::Unknown { .. } => {}
            TapEvent::Test(_) => {
                self.started = true;
                self.diagnostic_allowed = true;
            }
            TapEvent::Comment { .. } | TapEvent::Yaml { .. } => {
                self.started = true;
            }
            _ => {
                self.started = true;
                self.diagnostic_allowed = false;
            }
        }
        event
    }

    fn apply_version(&mut self, version: u32, raw: String) -> TapEvent {
        if self.started {
            self.parse_errors.push(
                "If TAP version is present, it must be the first line of output".to_string(),
            );
            return TapEvent::Unknown { raw };
        }
        if version < MIN_EXPLICIT_VERSION {
            self.parse_errors.push(format!(
                "Explicit TAP version must be at least {MIN_EXPLICIT_VERSION}. Got version {version}"
            ));
        } else if let Err(err) = self.grammar.set_version(version) {
            self.parse_errors.push(err.to_string());
        }
        TapEvent::Version { version, raw }
    }

    fn apply_plan(
        &mut self,
        planned: usize,
        directive: Option<Directive>,
        explanation: String,
        raw: String,
    ) -> TapEvent {
        if self.plan.is_some() {
            self.parse_errors
                .push("More than one plan found in TAP output".to_string());
        } else {
            self.plan = Some(planned);
            self.plan_position = if self.tests_run == 0 {
                PlanPosition::Leading
            } else {
                PlanPosition::Trailing
            };
            if directive == Some(Directive::Skip) {
                self.skip_all = true;
                self.skip_all_reason = Some(explanation.clone());
                if planned != 0 {
                    warn!(planned, "SKIP plan with a non-zero test count");
                }
            }
        }
        TapEvent::Plan {
            planned,
            directive,
            explanation,
            raw,
        }
    }

    fn apply_test(
        &mut self,
        ok: bool,
        declared: Option<usize>,
        description: String,
        directive: Option<Directive>,
        explanation: String,
        raw: String,
    ) -> TapEvent {
        let expected = self.next_expected;
        if let Some(number) = declared {
            if number != expected {
                self.parse_errors.push(format!(
                    "Tests out of sequence.  Found ({number}) but expected ({expected})"
                ));
            }
        }
        self.next_expected += 1;
        self.tests_run += 1;

        // A test after a trailing plan means the plan sat in the middle.
        if self.plan_position == PlanPosition::Trailing {
            self.plan_in_middle = true;
        }

        match directive {
            Some(Directive::Todo) => {
                self.todo += 1;
                self.passed += 1;
                if ok {
                    self.todo_passed += 1;
                }
            }
            _ => {
                if ok {
                    self.passed += 1;
                } else {
                    self.failed += 1;
                }
            }
        }
        if directive == Some(Directive::Skip) {
            self.skipped += 1;
        }

        TapEvent::Test(TestResult {
            number: expected,
            declared,
            actual_ok: ok,
            description,
            directive,
            explanation,
            raw,
        })
    }

    /// EOF processing: plan validation, derived flags, spool close, child
    /// status capture. With `drain` set (bail-out), remaining output is
    /// consumed unparsed so the child can be reaped.
    async fn finish(&mut self, drain: bool) -> Result<()> {
        if drain {
            while let Some(line) = self.source.next_line().await? {
                if let Some(spool) = &mut self.spool {
                    spool.write_line(&line)?;
                }
            }
        }

        match self.plan {
            None => {
                if self.tests_run > 0 {
                    self.parse_errors
                        .push("No plan found in TAP output".to_string());
                }
                self.is_good_plan = false;
            }
            Some(planned) => {
                if planned != self.tests_run {
                    self.parse_errors.push(format!(
                        "Bad plan.  You planned {} tests but ran {}.",
                        planned, self.tests_run
                    ));
                }
                if self.plan_in_middle {
                    self.parse_errors.push(format!(
                        "Plan (1..{planned}) must be at the beginning or end of the TAP output"
                    ));
                }
                self.is_good_plan = planned == self.tests_run;
            }
        }

        self.exit = self.source.exit_code();
        self.wait = self.source.wait_status();
        self.elapsed = self.started_at.elapsed();
        if let Some(spool) = self.spool.take() {
            spool.close()?;
        }
        self.finished = true;
        debug!(
            tests_run = self.tests_run,
            passed = self.passed,
            failed = self.failed,
            parse_errors = self.parse_errors.len(),
            "parser finished"
        );
        Ok(())
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn planned_tests(&self) -> Option<usize> {
        self.plan
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn todo(&self) -> usize {
        self.todo
    }

    pub fn todo_passed(&self) -> usize {
        self.todo_passed
    }

    pub fn parse_errors(&self) -> &[String] {
        &self.parse_errors
    }

    pub fn exit(&self) -> Option<i32> {
        self.exit
    }

    pub fn wait(&self) -> Option<i32> {
        self.wait
    }

    pub fn version(&self) -> u32 {
        self.grammar.version()
    }

    pub fn skip_all(&self) -> bool {
        self.skip_all
    }

    pub fn skip_all_reason(&self) -> Option<&str> {
        self.skip_all_reason.as_deref()
    }

    pub fn bailed_out(&self) -> bool {
        self.bailout_reason.is_some()
    }

    pub fn bailout_reason(&self) -> Option<&str> {
        self.bailout_reason.as_deref()
    }

    /// Valid after the stream has ended.
    pub fn is_good_plan(&self) -> bool {
        self.is_good_plan
    }

    pub fn has_problems(&self) -> bool {
        self.failed > 0
            || !self.parse_errors.is_empty()
            || self.exit.unwrap_or(0) != 0
            || self.wait.unwrap_or(0) != 0
    }

    pub fn summary(&self) -> ParserSummary {
        ParserSummary {
            tests_run: self.tests_run,
            planned: self.plan,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            todo: self.todo,
            todo_passed: self.todo_passed,
            parse_errors: self.parse_errors.clone(),
            exit: self.exit,
            wait: self.wait,
            version: self.grammar.version(),
            skip_all: self.skip_all,
            skip_all_reason: self.skip_all_reason.clone(),
            bailed_out: self.bailout_reason.is_some(),
            bailout_reason: self.bailout_reason.clone(),
            is_good_plan: self.is_good_plan,
            has_problems: self.has_problems(),
            elapsed: self.elapsed,
        }
    }
}
