//! Parser multiplexer
//!
//! Owns a set of live parsers and surfaces whichever has a result ready
//! first. Readiness selection is the runtime's poll over the armed
//! `parser.next()` futures; a quiet parser is never starved by a chatty
//! one because completed parsers re-enter the poll set at the back.
//!
//! Within one parser results arrive strictly in source order. Across
//! parsers the order is whichever stream produced a line first, so callers
//! must route each result by its stash, never by arrival order.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::Result;
use crate::parse::{Parser, TapEvent};

type ArmedParser<T> = BoxFuture<'static, (Parser, T, Result<Option<TapEvent>>)>;

/// One scheduling decision from [`Multiplexer::next`].
pub struct MuxItem<T> {
    /// The opaque value registered with the parser (test name, session).
    pub stash: T,
    /// `Some` for a produced result; `None` exactly once per parser when
    /// its stream ends.
    pub event: Option<TapEvent>,
    /// The finalized parser, handed back together with the end signal so
    /// the harness can collect its summary.
    pub parser: Option<Parser>,
}

pub struct Multiplexer<T> {
    in_flight: FuturesUnordered<ArmedParser<T>>,
}

impl<T> Default for Multiplexer<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Multiplexer<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Register a parser. Ownership moves in, so a parser can never be
    /// added twice; it comes back through [`MuxItem::parser`] at its end.
    pub fn add(&mut self, parser: Parser, stash: T) {
        self.in_flight.push(arm(parser, stash));
    }

    /// Number of parsers currently in flight.
    pub fn parsers(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait for the next ready parser. Returns `None` when no parsers
    /// remain.
    pub async fn next(&mut self) -> Result<Option<MuxItem<T>>> {
        let Some((parser, stash, result)) = self.in_flight.next().await else {
            return Ok(None);
        };
        match result? {
            Some(event) => {
                let rearm_stash = stash.clone();
                self.in_flight.push(arm(parser, rearm_stash));
                Ok(Some(MuxItem {
                    stash,
                    event: Some(event),
                    parser: None,
                }))
            }
            None => Ok(Some(MuxItem {
                stash,
                event: None,
                parser: Some(parser),
            })),
        }
    }
}

fn arm<T: Send + 'static>(mut parser: Parser, stash: T) -> ArmedParser<T> {
    Box::pin(async move {
        let result = parser.next().await;
        (parser, stash, result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn empty_multiplexer_ends_immediately() {
        let mut mux: Multiplexer<String> = Multiplexer::new();
        assert_eq!(mux.parsers(), 0);
        assert!(mux.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn per_parser_order_is_preserved() {
        let mut mux = Multiplexer::new();
        mux.add(Parser::from_str("1..2\nok 1 - a\nok 2 - b\n"), "alpha");
        mux.add(Parser::from_str("1..2\nnot ok 1 - x\nok 2 - y\n"), "beta");
        assert_eq!(mux.parsers(), 2);

        let mut per_parser: HashMap<&str, Vec<TapEvent>> = HashMap::new();
        let mut finalized = Vec::new();
        while let Some(item) = mux.next().await.unwrap() {
            match item.event {
                Some(event) => per_parser.entry(item.stash).or_default().push(event),
                None => finalized.push((item.stash, item.parser.unwrap())),
            }
        }

        // Each parser's events equal the sequence it yields in isolation.
        for (name, doc) in [
            ("alpha", "1..2\nok 1 - a\nok 2 - b\n"),
            ("beta", "1..2\nnot ok 1 - x\nok 2 - y\n"),
        ] {
            let mut lone = Parser::from_str(doc);
            let mut expected = Vec::new();
            while let Some(event) = lone.next().await.unwrap() {
                expected.push(event);
            }
            assert_eq!(per_parser[name], expected, "stream for {name}");
        }

        assert_eq!(finalized.len(), 2);
        for (name, parser) in finalized {
            assert_eq!(parser.tests_run(), 2, "tests for {name}");
            match name {
                "alpha" => assert!(!parser.has_problems()),
                "beta" => assert!(parser.has_problems()),
                other => panic!("unexpected stash {other}"),
            }
        }
    }

    #[tokio::test]
    async fn end_is_surfaced_once_per_parser() {
        let mut mux = Multiplexer::new();
        mux.add(Parser::from_str("1..0 # SKIP\n"), 7u32);

        let mut ends = 0;
        while let Some(item) = mux.next().await.unwrap() {
            if item.event.is_none() {
                ends += 1;
                assert!(item.parser.is_some());
            }
        }
        assert_eq!(ends, 1);
        assert_eq!(mux.parsers(), 0);
    }
}
