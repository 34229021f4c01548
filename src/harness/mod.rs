//! Test harness
//!
//! Runs a set of test scripts, parses their TAP output, and aggregates the
//! results. Three execution strategies share the same observable behavior
//! per test: sequential (`jobs = 1`), live multiplexing (`jobs > 1`), and a
//! worker pool (`jobs > 1, fork`) that runs each test to completion and
//! replays its output when it finishes.
//!
//! A bail-out from any parser ends the whole run: the current test's
//! session is closed and the remaining tests are abandoned.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::multiplex::Multiplexer;
use crate::parse::{EventKind, Parser, ParserSummary, TapEvent};
use crate::process::{ProcessCommand, ProcessSource};
use crate::spool::{SpoolWriter, DUMP_TAP_ENV};

pub mod aggregator;
pub mod config;
pub mod formatter;

pub use aggregator::{Aggregator, RunStatus};
pub use config::HarnessConfig;
pub use formatter::{ConsoleFormatter, Formatter, Session};

/// Set process-wide for the duration of a harness's life.
pub const HARNESS_ACTIVE_ENV: &str = "HARNESS_ACTIVE";
pub const HARNESS_VERSION_ENV: &str = "HARNESS_VERSION";

type AggregatorCallback = Arc<dyn Fn(&Aggregator) + Send + Sync>;
type ParserCallback = Arc<dyn Fn(&Parser) + Send + Sync>;
type EventCallback = Arc<dyn Fn(&TapEvent) + Send + Sync>;

/// The aggregated outcome of one harness run.
pub struct RunOutcome {
    pub aggregator: Aggregator,
    pub bailed_out: bool,
}

impl RunOutcome {
    /// 0 when everything passed, 1 for any failure, parse error, or
    /// bail-out.
    pub fn exit_code(&self) -> i32 {
        if self.bailed_out || self.aggregator.has_errors() {
            1
        } else {
            0
        }
    }
}

/// Everything needed to construct a parser for one test, cheap to clone
/// into worker tasks.
#[derive(Clone)]
struct ParserFactory {
    config: HarnessConfig,
    spool_root: Option<PathBuf>,
    parser_events: Vec<(EventKind, EventCallback)>,
    made_parser: Vec<ParserCallback>,
}

impl ParserFactory {
    fn command(&self, name: &str) -> ProcessCommand {
        let command = if let Some(exec) = &self.config.exec {
            ProcessCommand::new(&exec[0])
                .args(exec[1..].iter().cloned())
                .arg(name)
        } else if let Some(interpreter) = &self.config.interpreter {
            ProcessCommand::new(interpreter)
                .args(self.config.deduped_switches())
                .args(self.config.lib.iter().map(|path| format!("-I{path}")))
                .arg(name)
        } else {
            ProcessCommand::new(name)
        };
        command.merge(self.config.merge)
    }

    fn make(&self, name: &str) -> Result<Parser> {
        let source = ProcessSource::spawn(self.command(name), None)?;
        let mut parser = Parser::new(Box::new(source));
        if let Some(root) = &self.spool_root {
            parser = parser.with_spool(SpoolWriter::create(root, name)?);
        }
        for (kind, callback) in &self.parser_events {
            let callback = callback.clone();
            parser
                .callbacks_mut()
                .register(*kind, move |event| callback(event));
        }
        for callback in &self.made_parser {
            callback(&parser);
        }
        Ok(parser)
    }

    /// Stand-in summary for a test whose script could not be spawned.
    fn spawn_failure(&self, name: &str, err: &Error) -> ParserSummary {
        warn!(test = name, "failed to spawn: {err}");
        ParserSummary {
            tests_run: 0,
            planned: None,
            passed: 0,
            failed: 0,
            skipped: 0,
            todo: 0,
            todo_passed: 0,
            parse_errors: vec![err.to_string()],
            exit: Some(-1),
            wait: Some(-1),
            version: crate::grammar::DEFAULT_VERSION,
            skip_all: false,
            skip_all_reason: None,
            bailed_out: false,
            bailout_reason: None,
            is_good_plan: false,
            has_problems: true,
            elapsed: Duration::ZERO,
        }
    }
}

/// Sets the classic harness environment flags for the process and clears
/// them again once the last live harness goes away.
struct EnvGuard;

static ENV_GUARDS: AtomicUsize = AtomicUsize::new(0);

impl EnvGuard {
    fn new() -> Self {
        if ENV_GUARDS.fetch_add(1, Ordering::SeqCst) == 0 {
            std::env::set_var(HARNESS_ACTIVE_ENV, "1");
            std::env::set_var(HARNESS_VERSION_ENV, env!("CARGO_PKG_VERSION"));
        }
        Self
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if ENV_GUARDS.fetch_sub(1, Ordering::SeqCst) == 1 {
            std::env::remove_var(HARNESS_ACTIVE_ENV);
            std::env::remove_var(HARNESS_VERSION_ENV);
        }
    }
}

pub struct Harness {
    factory: ParserFactory,
    formatter: Box<dyn Formatter>,
    before_runtests: Vec<AggregatorCallback>,
    after_runtests: Vec<AggregatorCallback>,
    _env: EnvGuard,
}

impl Harness {
    /// Validate the configuration and prepare the console formatter.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        ConsoleFormatter::set_color(config.color);
        let formatter = Box::new(ConsoleFormatter::new(
            config.verbosity,
            config.timer,
            config.failures,
            config.directives,
        ));
        Self::with_formatter(config, formatter)
    }

    /// Use an injected formatter instead of the console one.
    pub fn with_formatter(config: HarnessConfig, formatter: Box<dyn Formatter>) -> Result<Self> {
        config.validate()?;
        let spool_root = config.spool_dir.clone().or_else(|| {
            std::env::var(DUMP_TAP_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });
        Ok(Self {
            factory: ParserFactory {
                config,
                spool_root,
                parser_events: Vec::new(),
                made_parser: Vec::new(),
            },
            formatter,
            before_runtests: Vec::new(),
            after_runtests: Vec::new(),
            _env: EnvGuard::new(),
        })
    }

    pub fn on_before_runtests<F>(&mut self, callback: F)
    where
        F: Fn(&Aggregator) + Send + Sync + 'static,
    {
        self.before_runtests.push(Arc::new(callback));
    }

    pub fn on_after_runtests<F>(&mut self, callback: F)
    where
        F: Fn(&Aggregator) + Send + Sync + 'static,
    {
        self.after_runtests.push(Arc::new(callback));
    }

    pub fn on_made_parser<F>(&mut self, callback: F)
    where
        F: Fn(&Parser) + Send + Sync + 'static,
    {
        self.factory.made_parser.push(Arc::new(callback));
    }

    /// Register a parser-event callback by its configuration name. The
    /// name is validated here, before any run starts.
    pub fn on_parser_event<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&TapEvent) + Send + Sync + 'static,
    {
        let kind = EventKind::from_name(name)?;
        self.factory.parser_events.push((kind, Arc::new(callback)));
        Ok(())
    }

    /// Run every test and aggregate the results.
    pub async fn run(&mut self, tests: &[PathBuf]) -> Result<RunOutcome> {
        let names: Vec<String> = tests
            .iter()
            .map(|t| t.display().to_string())
            .collect();
        info!(
            files = names.len(),
            jobs = self.factory.config.jobs,
            fork = self.factory.config.fork,
            "starting test run"
        );

        let mut aggregator = Aggregator::new();
        aggregator.start();
        for callback in &self.before_runtests {
            callback(&aggregator);
        }
        self.formatter.open(&names);

        let bailed_out = if self.factory.config.jobs == 1 {
            self.run_sequential(&names, &mut aggregator).await?
        } else if self.factory.config.fork {
            self.run_workers(&names, &mut aggregator).await?
        } else {
            self.run_multiplexed(&names, &mut aggregator).await?
        };

        aggregator.stop();
        for callback in &self.after_runtests {
            callback(&aggregator);
        }
        self.formatter.summary(&aggregator);
        Ok(RunOutcome {
            aggregator,
            bailed_out,
        })
    }

    async fn run_sequential(
        &mut self,
        names: &[String],
        aggregator: &mut Aggregator,
    ) -> Result<bool> {
        for name in names {
            let mut session = self.formatter.session(name);
            let mut parser = match self.factory.make(name) {
                Ok(parser) => parser,
                Err(err @ Error::Spawn { .. }) => {
                    let summary = self.factory.spawn_failure(name, &err);
                    session.close(&summary);
                    aggregator.add(name.clone(), summary)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            while let Some(event) = parser.next().await? {
                session.result(&event);
            }
            let summary = parser.summary();
            let bailed = summary.bailed_out;
            session.close(&summary);
            aggregator.add(name.clone(), summary)?;
            if bailed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn run_multiplexed(
        &mut self,
        names: &[String],
        aggregator: &mut Aggregator,
    ) -> Result<bool> {
        let jobs = self.factory.config.jobs;
        let mut pending: VecDeque<String> = names.iter().cloned().collect();
        let mut mux: Multiplexer<String> = Multiplexer::new();
        let mut sessions: HashMap<String, Box<dyn Session>> = HashMap::new();

        self.refill(&mut mux, &mut sessions, &mut pending, aggregator, jobs)?;

        while let Some(item) = mux.next().await? {
            match item.event {
                Some(event) => {
                    let bailed = event.is_bailout();
                    if let Some(session) = sessions.get_mut(&item.stash) {
                        session.result(&event);
                    }
                    if bailed {
                        // Close the bailing session; in-flight parsers are
                        // abandoned unfinished.
                        debug!(test = %item.stash, "bail-out received, ending run");
                        if let Some(parser) = pump_to_end(&mut mux, &item.stash).await? {
                            let summary = parser.summary();
                            if let Some(mut session) = sessions.remove(&item.stash) {
                                session.close(&summary);
                            }
                            aggregator.add(item.stash.clone(), summary)?;
                        }
                        return Ok(true);
                    }
                }
                None => {
                    let parser = item.parser.expect("parser returned at end");
                    let summary = parser.summary();
                    if let Some(mut session) = sessions.remove(&item.stash) {
                        session.close(&summary);
                    }
                    aggregator.add(item.stash.clone(), summary)?;
                    self.refill(&mut mux, &mut sessions, &mut pending, aggregator, jobs)?;
                }
            }
        }
        Ok(false)
    }

    /// Top the multiplexer back up to `jobs` parsers.
    fn refill(
        &mut self,
        mux: &mut Multiplexer<String>,
        sessions: &mut HashMap<String, Box<dyn Session>>,
        pending: &mut VecDeque<String>,
        aggregator: &mut Aggregator,
        jobs: usize,
    ) -> Result<()> {
        while mux.parsers() < jobs {
            let Some(name) = pending.pop_front() else {
                break;
            };
            match self.factory.make(&name) {
                Ok(parser) => {
                    sessions.insert(name.clone(), self.formatter.session(&name));
                    mux.add(parser, name);
                }
                Err(err @ Error::Spawn { .. }) => {
                    let summary = self.factory.spawn_failure(&name, &err);
                    self.formatter.session(&name).close(&summary);
                    aggregator.add(name, summary)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn run_workers(&mut self, names: &[String], aggregator: &mut Aggregator) -> Result<bool> {
        let semaphore = Arc::new(Semaphore::new(self.factory.config.jobs));
        // Workers hand their summary back serialized, the same shape a
        // process pool would ship over a pipe.
        let mut set: JoinSet<Result<(String, Vec<TapEvent>, String)>> = JoinSet::new();

        for name in names {
            let name = name.clone();
            let factory = self.factory.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
                let mut parser = match factory.make(&name) {
                    Ok(parser) => parser,
                    Err(err @ Error::Spawn { .. }) => {
                        let summary = factory.spawn_failure(&name, &err);
                        return Ok((name, Vec::new(), serde_json::to_string(&summary)?));
                    }
                    Err(err) => return Err(err),
                };
                let mut events = Vec::new();
                while let Some(event) = parser.next().await? {
                    events.push(event);
                }
                let payload = serde_json::to_string(&parser.summary())?;
                Ok((name, events, payload))
            });
        }

        while let Some(joined) = set.join_next().await {
            let (name, events, payload) =
                joined.map_err(|e| Error::Internal(format!("worker panicked: {e}")))??;
            let summary: ParserSummary = serde_json::from_str(&payload)?;
            let mut session = self.formatter.session(&name);
            for event in &events {
                session.result(event);
            }
            let bailed = summary.bailed_out;
            session.close(&summary);
            aggregator.add(name, summary)?;
            if bailed {
                set.abort_all();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// After a bail-out, pump the multiplexer just far enough to get the
/// bailing parser's finalized state back. Its end arrives on its next
/// poll; other parsers' events are discarded.
async fn pump_to_end(mux: &mut Multiplexer<String>, stash: &str) -> Result<Option<Parser>> {
    while let Some(item) = mux.next().await? {
        if item.stash == stash {
            if let Some(parser) = item.parser {
                return Ok(Some(parser));
            }
        }
    }
    Ok(None)
}

/// Build a test list from explicit paths, expanding directories one level
/// the way a test runner is usually pointed at `t/`.
pub fn expand_tests(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut tests = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            tests.extend(entries);
        } else {
            tests.push(path.clone());
        }
    }
    Ok(tests)
}
