//! Embedded block-document reader for TAP v13 structured diagnostics.
//!
//! A diagnostic block opens with an indented `---` line directly under a
//! test line. Every following line carrying the same indentation prefix
//! belongs to the block; the `...` end marker closes it. A line that falls
//! outside the prefix terminates the block early and is returned to the
//! enclosing stream.

use tracing::trace;

use crate::error::Result;
use crate::source::{PushbackSource, TapSource};

/// A fully consumed diagnostic block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDocument {
    /// Prefix-stripped document text, including the `---` opener.
    pub document: String,
    /// Verbatim source lines, newline-joined.
    pub raw: String,
    /// Parsed value tree; `Null` when parsing failed.
    pub payload: serde_yaml::Value,
    /// Set when the block ended without its `...` marker or did not parse.
    pub malformed: bool,
}

/// Consume a diagnostic block from `source`.
///
/// `prefix` and `opening` are the captures of the current opening-line
/// match: the indentation and the `---...` tail.
pub async fn read_block(
    source: &mut PushbackSource,
    prefix: &str,
    opening: &str,
) -> Result<BlockDocument> {
    let mut doc_lines = vec![opening.to_string()];
    let mut raw_lines = vec![format!("{prefix}{opening}")];
    let mut terminated = false;

    while let Some(line) = source.next_line().await? {
        match line.strip_prefix(prefix) {
            Some(tail) => {
                raw_lines.push(line.clone());
                if tail.trim_end() == "..." {
                    terminated = true;
                    break;
                }
                doc_lines.push(tail.to_string());
            }
            None => {
                trace!("diagnostic block closed by out-of-block line");
                source.unread(line);
                break;
            }
        }
    }

    let document = doc_lines.join("\n");
    let payload = parse_document(&document);
    let malformed = !terminated || payload.is_none();

    Ok(BlockDocument {
        raw: raw_lines.join("\n"),
        payload: payload.unwrap_or(serde_yaml::Value::Null),
        document,
        malformed,
    })
}

/// The document parser proper. Pluggable in principle; the stock engine
/// hands the reconstructed text to serde_yaml.
fn parse_document(document: &str) -> Option<serde_yaml::Value> {
    serde_yaml::from_str(document).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ArraySource;

    async fn read(lines: &[&str], prefix: &str, opening: &str) -> (BlockDocument, PushbackSource) {
        let source = ArraySource::new(lines.iter().map(|s| s.to_string()).collect());
        let mut source = PushbackSource::new(Box::new(source));
        let block = read_block(&mut source, prefix, opening).await.unwrap();
        (block, source)
    }

    #[tokio::test]
    async fn reads_mapping_until_end_marker() {
        let (block, mut rest) = read(
            &["  message: failed", "  severity: fail", "  ...", "ok 2"],
            "  ",
            "---",
        )
        .await;

        assert!(!block.malformed);
        assert_eq!(block.document, "---\nmessage: failed\nseverity: fail");
        assert_eq!(
            block.payload["message"],
            serde_yaml::Value::String("failed".into())
        );
        // The line after the block is still in the stream.
        assert_eq!(rest.next_line().await.unwrap().as_deref(), Some("ok 2"));
    }

    #[tokio::test]
    async fn out_of_block_line_is_unread() {
        let (block, mut rest) = read(&["  got: 1", "not ok 2"], "  ", "---").await;

        assert!(block.malformed);
        assert_eq!(
            rest.next_line().await.unwrap().as_deref(),
            Some("not ok 2")
        );
    }

    #[tokio::test]
    async fn eof_without_marker_is_malformed() {
        let (block, _) = read(&["  got: 1"], "  ", "---").await;
        assert!(block.malformed);
        assert_eq!(block.payload["got"].as_u64(), Some(1));
    }

    #[tokio::test]
    async fn nested_structures_parse() {
        let (block, _) = read(
            &[
                "  extensions:",
                "    details:",
                "      - alpha",
                "      - beta",
                "  ...",
            ],
            "  ",
            "---",
        )
        .await;

        assert!(!block.malformed);
        let details = &block.payload["extensions"]["details"];
        assert_eq!(details[0], serde_yaml::Value::String("alpha".into()));
        assert_eq!(details[1], serde_yaml::Value::String("beta".into()));
    }

    #[tokio::test]
    async fn raw_preserves_indentation() {
        let (block, _) = read(&["  got: 1", "  ..."], "  ", "---").await;
        assert_eq!(block.raw, "  ---\n  got: 1\n  ...");
    }
}
