//! Command-line interface
//!
//! A `prove`-style wrapper around the harness. Argument definitions live
//! here; `main.rs` handles tracing setup and exit-code mapping.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser as ClapParser;

use crate::harness::{expand_tests, Harness, HarnessConfig};

/// Run TAP test scripts and summarize the results
#[derive(ClapParser, Debug)]
#[command(name = "tappet")]
#[command(about = "tappet - run TAP test scripts and summarize the results", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Test scripts or directories of test scripts
    #[arg(value_name = "TESTS", required = true)]
    pub tests: Vec<PathBuf>,

    /// Number of tests to run in parallel
    #[arg(short = 'j', long, default_value = "1")]
    pub jobs: usize,

    /// Run each test to completion in a worker and replay its output when
    /// it finishes (requires --jobs > 1)
    #[arg(long)]
    pub fork: bool,

    /// Command prefix to run each test with, split on whitespace,
    /// e.g. --exec "sh -x"
    #[arg(long, value_name = "CMD")]
    pub exec: Option<String>,

    /// Interpreter to run scripts with when --exec is not given
    #[arg(long, value_name = "PROGRAM")]
    pub interpreter: Option<String>,

    /// Library path passed to the interpreter as -I<path>
    #[arg(short = 'I', long = "lib", value_name = "PATH")]
    pub lib: Vec<String>,

    /// Extra interpreter switches
    #[arg(long, value_name = "SWITCH", allow_hyphen_values = true)]
    pub switches: Vec<String>,

    /// Merge each test's stderr into its TAP stream
    #[arg(long)]
    pub merge: bool,

    /// Show per-test elapsed time
    #[arg(long)]
    pub timer: bool,

    /// Show failed test lines in the default view
    #[arg(long)]
    pub failures: bool,

    /// Show TODO/SKIP directive lines in the default view
    #[arg(long)]
    pub directives: bool,

    /// Force color output
    #[arg(long, conflicts_with = "no_color")]
    pub color: bool,

    /// Disable color output
    #[arg(long)]
    pub no_color: bool,

    /// Quieter output (-q hides passing tests, -qq hides the summary too)
    #[arg(short = 'q', long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,

    /// Verbose output (-v echoes TAP, more repeats raise the log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write a verbatim copy of each test's TAP under this directory
    #[arg(long, value_name = "DIR")]
    pub dump_tap: Option<PathBuf>,
}

impl Cli {
    pub fn to_config(&self) -> HarnessConfig {
        HarnessConfig {
            lib: self.lib.clone(),
            switches: self.switches.clone(),
            interpreter: self.interpreter.clone(),
            exec: self
                .exec
                .as_ref()
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect()),
            merge: self.merge,
            jobs: self.jobs,
            fork: self.fork,
            verbosity: self.verbose as i8 - self.quiet as i8,
            timer: self.timer,
            failures: self.failures,
            directives: self.directives,
            color: match (self.color, self.no_color) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            spool_dir: self.dump_tap.clone(),
        }
    }
}

/// Run the harness for a parsed command line and return the process exit
/// code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let tests = expand_tests(&cli.tests).context("failed to expand test paths")?;
    if tests.is_empty() {
        anyhow::bail!("no test scripts found");
    }
    let mut harness = Harness::new(cli.to_config()).context("invalid harness configuration")?;
    let outcome = harness.run(&tests).await.context("test run failed")?;
    Ok(outcome.exit_code())
}
