//! Line sources feeding the TAP tokenizer
//!
//! A source is a lazy sequence of newline-stripped lines. Three
//! implementations share the [`TapSource`] trait: [`ArraySource`] over an
//! in-memory vector, [`FileSource`] over a file on disk, and
//! [`ProcessSource`](crate::process::ProcessSource) over a child process's
//! piped output. [`PushbackSource`] wraps any of them with a one-slot unread
//! buffer, which the embedded diagnostic-block reader needs to return the
//! line that terminated a block.

use async_trait::async_trait;

use crate::error::Result;

pub mod array;
pub mod file;

pub use array::ArraySource;
pub use file::FileSource;

/// A lazy stream of lines.
///
/// `next_line` returns `Ok(None)` at end of stream; end is sticky, so
/// every subsequent call returns `Ok(None)` again. Lines never include the
/// trailing `\n` or `\r`.
#[async_trait]
pub trait TapSource: Send {
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Raw wait status of a backing child process, available once the
    /// stream has ended. Sources with no process return `None`.
    fn wait_status(&self) -> Option<i32> {
        None
    }

    /// Exit code derived from the wait status, same availability rules.
    fn exit_code(&self) -> Option<i32> {
        None
    }
}

/// Strip a trailing `\r` left behind after newline splitting.
pub(crate) fn chomp(mut line: String) -> String {
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// Wraps a source with a single-slot pushback buffer.
///
/// The diagnostic-block reader consumes lines until one falls outside the
/// block; that line belongs to the enclosing stream and is unread here.
pub struct PushbackSource {
    inner: Box<dyn TapSource>,
    unread: Option<String>,
}

impl PushbackSource {
    pub fn new(inner: Box<dyn TapSource>) -> Self {
        Self {
            inner,
            unread: None,
        }
    }

    /// Return a line to the stream. At most one line may be pending.
    pub fn unread(&mut self, line: String) {
        debug_assert!(self.unread.is_none(), "pushback slot already occupied");
        self.unread = Some(line);
    }
}

#[async_trait]
impl TapSource for PushbackSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.unread.take() {
            return Ok(Some(line));
        }
        self.inner.next_line().await
    }

    fn wait_status(&self) -> Option<i32> {
        self.inner.wait_status()
    }

    fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushback_returns_unread_line_first() {
        let source = ArraySource::new(vec!["one".into(), "two".into()]);
        let mut source = PushbackSource::new(Box::new(source));

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("one"));
        source.unread("one again".to_string());
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("one again")
        );
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("two"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[test]
    fn chomp_strips_carriage_return() {
        assert_eq!(chomp("ok 1\r".to_string()), "ok 1");
        assert_eq!(chomp("ok 1".to_string()), "ok 1");
    }
}
