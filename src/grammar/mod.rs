//! TAP grammar: versioned line-regex dispatch producing typed tokens
//!
//! The grammar holds one rule table per supported TAP version. v12 knows
//! version, plan, test, comment, and bailout lines; v13 adds the indented
//! structured-diagnostic block. Unmatched lines become [`Token::Unknown`],
//! never an error; the parser layer decides what is a problem.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::source::PushbackSource;

pub mod token;
pub mod yamlish;

pub use token::{Directive, Token};

/// Lowest TAP version with an explicit `TAP version N` line.
pub const MIN_EXPLICIT_VERSION: u32 = 13;

/// Version assumed when no version line is present.
pub const DEFAULT_VERSION: u32 = 12;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^TAP\s+version\s+(\d+)\s*$").unwrap());
static PLAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^1\.\.(\d+)(?:\s*#\s*(?i:SKIP)\b(.*))?\s*$").unwrap());
static TEST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(not ok|ok)\b\s*(\d+)?\s*(.*)$").unwrap());
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#(.*)").unwrap());
static BAILOUT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Bail out!\s*(.*)").unwrap());
static YAML_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s+)(---.*)$").unwrap());

// Description up to the first unescaped '#', then the directive word and its
// explanation. `\#` inside the description does not open a directive.
static DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^\\#]*(?:\\.[^\\#]*)*)#\s*((?i:SKIP|TODO))\b\s*(.*)$").unwrap());

/// The tokenizer. Construct once per stream; the active version selects the
/// rule table.
#[derive(Debug)]
pub struct Grammar {
    version: u32,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    pub fn new() -> Self {
        Self {
            version: DEFAULT_VERSION,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Switch the rule table. Versions below 12 have no grammar.
    pub fn set_version(&mut self, version: u32) -> Result<()> {
        if version < DEFAULT_VERSION {
            return Err(Error::Version(version));
        }
        trace!(version, "grammar version set");
        self.version = version;
        Ok(())
    }

    /// Tokenize one line. Structured-diagnostic openers pull their
    /// continuation lines from `source`.
    pub async fn tokenize(&self, line: String, source: &mut PushbackSource) -> Result<Token> {
        if let Some(caps) = TEST_RE.captures(&line) {
            return Ok(self.make_test_token(&line, &caps));
        }
        if let Some(caps) = PLAN_RE.captures(&line) {
            if let Some(token) = self.make_plan_token(&line, &caps) {
                return Ok(token);
            }
        }
        if let Some(caps) = COMMENT_RE.captures(&line) {
            let text = caps[1].trim().to_string();
            return Ok(Token::Comment { text, raw: line });
        }
        if let Some(caps) = BAILOUT_RE.captures(&line) {
            let reason = caps[1].trim().to_string();
            return Ok(Token::Bailout { reason, raw: line });
        }
        if let Some(caps) = VERSION_RE.captures(&line) {
            if let Ok(version) = caps[1].parse::<u32>() {
                return Ok(Token::Version { version, raw: line });
            }
        }
        if self.version >= 13 {
            if let Some(caps) = YAML_RE.captures(&line) {
                let block = yamlish::read_block(source, &caps[1], &caps[2]).await?;
                return Ok(Token::Yaml {
                    payload: block.payload,
                    document: block.document,
                    raw: block.raw,
                    malformed: block.malformed,
                });
            }
        }
        Ok(Token::Unknown { raw: line })
    }

    fn make_plan_token(&self, line: &str, caps: &regex::Captures<'_>) -> Option<Token> {
        let planned = caps[1].parse::<usize>().ok()?;
        let (directive, explanation) = match caps.get(2) {
            Some(rest) => (Some(Directive::Skip), rest.as_str().trim().to_string()),
            None => (None, String::new()),
        };
        Some(Token::Plan {
            planned,
            directive,
            explanation,
            raw: line.to_string(),
        })
    }

    fn make_test_token(&self, line: &str, caps: &regex::Captures<'_>) -> Token {
        let ok = &caps[1] == "ok";
        let number = caps.get(2).and_then(|n| n.as_str().parse::<usize>().ok());
        let rest = caps.get(3).map_or("", |m| m.as_str());

        let (description, directive, explanation) = match DIRECTIVE_RE.captures(rest) {
            Some(dcaps) => {
                let word = dcaps[2].to_uppercase();
                (
                    dcaps[1].trim().to_string(),
                    Directive::from_word(&word),
                    dcaps[3].trim().to_string(),
                )
            }
            None => (rest.trim().to_string(), None, String::new()),
        };

        Token::Test {
            ok,
            number,
            description,
            directive,
            explanation,
            raw: line.to_string(),
        }
    }
}
