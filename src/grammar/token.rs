//! Typed tokens produced by the TAP grammar.

use serde::{Deserialize, Serialize};

/// Post-description annotation on a test or plan line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Todo,
    Skip,
}

impl Directive {
    /// Parse an already upper-cased directive word.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "TODO" => Some(Directive::Todo),
            "SKIP" => Some(Directive::Skip),
            _ => None,
        }
    }
}

/// One grammar token. Every variant carries the raw source line(s) so a
/// stream can be reproduced verbatim for diagnostics and spooling.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `TAP version 13`
    Version { version: u32, raw: String },
    /// `1..N`, optionally `1..0 # SKIP reason`
    Plan {
        planned: usize,
        directive: Option<Directive>,
        explanation: String,
        raw: String,
    },
    /// `ok 1 - description # TODO explanation`
    Test {
        ok: bool,
        number: Option<usize>,
        description: String,
        directive: Option<Directive>,
        explanation: String,
        raw: String,
    },
    /// `# anything`
    Comment { text: String, raw: String },
    /// `Bail out! reason`
    Bailout { reason: String, raw: String },
    /// An indented `---` ... `...` block of structured diagnostics.
    Yaml {
        payload: serde_yaml::Value,
        /// Document text with the indentation prefix stripped.
        document: String,
        /// Verbatim source lines of the whole block, newline-joined.
        raw: String,
        /// True when the block was unterminated or failed to parse.
        malformed: bool,
    },
    /// Anything the active grammar table did not recognize.
    Unknown { raw: String },
}

impl Token {
    /// The verbatim source text of this token.
    pub fn raw(&self) -> &str {
        match self {
            Token::Version { raw, .. }
            | Token::Plan { raw, .. }
            | Token::Test { raw, .. }
            | Token::Comment { raw, .. }
            | Token::Bailout { raw, .. }
            | Token::Yaml { raw, .. }
            | Token::Unknown { raw } => raw,
        }
    }
}
