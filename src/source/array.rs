//! In-memory line source, used heavily by tests and by callers that already
//! hold a captured TAP document.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::{chomp, TapSource};
use crate::error::Result;

pub struct ArraySource {
    lines: VecDeque<String>,
}

impl ArraySource {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines: lines.into_iter().map(chomp).collect(),
        }
    }

    /// Split a whole document on newlines. A trailing newline does not
    /// produce a phantom empty line.
    pub fn from_str(text: &str) -> Self {
        let trimmed = text.strip_suffix('\n').unwrap_or(text);
        if trimmed.is_empty() {
            return Self {
                lines: VecDeque::new(),
            };
        }
        Self::new(trimmed.split('\n').map(str::to_string).collect())
    }
}

#[async_trait]
impl TapSource for ArraySource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}
