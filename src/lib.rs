//! # tappet
//!
//! A streaming TAP (Test Anything Protocol) engine: a tokenizer and parser
//! for TAP streams, a deadlock-free child-process line source, a
//! multiplexer that drives many parsers concurrently, and a harness that
//! runs whole test suites and aggregates their results.
//!
//! ## Usage
//!
//! ```no_run
//! use tappet::harness::{Harness, HarnessConfig};
//!
//! # async fn run() -> tappet::Result<()> {
//! let mut harness = Harness::new(HarnessConfig::default())?;
//! let outcome = harness.run(&["t/basic.t".into()]).await?;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```
//!
//! ## Modules
//!
//! - `source` - Line sources: in-memory, file, and pushback wrapper
//! - `grammar` - Versioned TAP tokenizer with the v13 diagnostic-block reader
//! - `parse` - Parser state machine, statistics, and event callbacks
//! - `process` - Child-process line source with concurrent pipe readers
//! - `multiplex` - Readiness-driven fan-in over many parsers
//! - `harness` - Run strategies, aggregation, and output formatting
//! - `spool` - Verbatim TAP copies under a dump directory
pub mod cli;
pub mod error;
pub mod grammar;
pub mod harness;
pub mod multiplex;
pub mod parse;
pub mod process;
pub mod source;
pub mod spool;

// Re-export the types nearly every consumer touches.
pub use error::{Error, Result};
pub use grammar::{Directive, Grammar, Token};
pub use harness::{Aggregator, Harness, HarnessConfig};
pub use parse::{Parser, ParserSummary, TapEvent};
