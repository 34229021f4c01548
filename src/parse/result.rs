//! Parser result events
//!
//! A [`TapEvent`] is a grammar token with parser semantics applied: test
//! lines gain their assigned number and the derived ok/TODO/SKIP flags.

use crate::grammar::Directive;

/// A single test line after renumbering and directive resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// Number assigned by the parser (always the expected sequence number).
    pub number: usize,
    /// Number written on the line, if any.
    pub declared: Option<usize>,
    /// Literal ok / not ok.
    pub actual_ok: bool,
    pub description: String,
    pub directive: Option<Directive>,
    pub explanation: String,
    pub raw: String,
}

impl TestResult {
    /// The literal result as written.
    pub fn is_actual_ok(&self) -> bool {
        self.actual_ok
    }

    /// The effective result: a TODO test never counts as a failure.
    pub fn is_ok(&self) -> bool {
        self.actual_ok || self.has_todo()
    }

    pub fn has_todo(&self) -> bool {
        self.directive == Some(Directive::Todo)
    }

    pub fn has_skip(&self) -> bool {
        self.directive == Some(Directive::Skip)
    }

    /// A TODO test that unexpectedly passed.
    pub fn is_unplanned_win(&self) -> bool {
        self.has_todo() && self.actual_ok
    }
}

/// A typed event emitted by the parser, one per consumed token.
#[derive(Debug, Clone, PartialEq)]
pub enum TapEvent {
    Version {
        version: u32,
        raw: String,
    },
    Plan {
        planned: usize,
        directive: Option<Directive>,
        explanation: String,
        raw: String,
    },
    Test(TestResult),
    Comment {
        text: String,
        raw: String,
    },
    Bailout {
        reason: String,
        raw: String,
    },
    Yaml {
        payload: serde_yaml::Value,
        document: String,
        raw: String,
    },
    Unknown {
        raw: String,
    },
}

impl TapEvent {
    /// The verbatim source text behind this event.
    pub fn raw(&self) -> &str {
        match self {
            TapEvent::Version { raw, .. }
            | TapEvent::Plan { raw, .. }
            | TapEvent::Comment { raw, .. }
            | TapEvent::Bailout { raw, .. }
            | TapEvent::Yaml { raw, .. }
            | TapEvent::Unknown { raw } => raw,
            TapEvent::Test(test) => &test.raw,
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, TapEvent::Test(_))
    }

    pub fn is_plan(&self) -> bool {
        matches!(self, TapEvent::Plan { .. })
    }

    pub fn is_bailout(&self) -> bool {
        matches!(self, TapEvent::Bailout { .. })
    }

    pub fn as_test(&self) -> Option<&TestResult> {
        match self {
            TapEvent::Test(test) => Some(test),
            _ => None,
        }
    }
}
