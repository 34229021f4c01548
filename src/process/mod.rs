//! Child-process line source
//!
//! Spawns a test script and exposes its output as a [`TapSource`]. Both
//! pipes are read concurrently by a reader task each, feeding one bounded
//! channel, so a chatty stderr can never deadlock against a full stdout
//! buffer. With `merge` set, stderr lines join the returned stream;
//! otherwise they go verbatim to a diagnostic sink and only stdout lines
//! come back from `next_line`.
//!
//! A non-zero child exit is not an error here; it is surfaced through
//! `exit_code` once the stream has ended. Only failure to spawn is fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::source::{chomp, TapSource};

/// Capacity of the line channel shared by the two pipe readers.
const CHANNEL_CAPACITY: usize = 64;

/// Receives stderr lines (newline included) when `merge` is off.
pub type DiagnosticSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once, after the child has been reaped, with the original argv.
pub type TeardownHook = Box<dyn FnOnce(&[String]) + Send>;

/// Which pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamSource {
    Stdout,
    Stderr,
}

/// A command to spawn, as a plain value with builder methods.
#[derive(Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub merge: bool,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            merge: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// The argv vector handed to hooks.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl std::fmt::Debug for ProcessCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

pub struct ProcessSource {
    rx: mpsc::Receiver<(StreamSource, String)>,
    child: Option<Child>,
    argv: Vec<String>,
    sink: Option<DiagnosticSink>,
    teardown: Option<TeardownHook>,
    wait: Option<i32>,
    exit: Option<i32>,
    done: bool,
}

impl ProcessSource {
    /// Spawn `command` and start both pipe readers.
    pub fn spawn(command: ProcessCommand, sink: Option<DiagnosticSink>) -> Result<Self> {
        Self::spawn_with(command, sink, None, None)
    }

    /// Full-control spawn: an optional pre-launch hook mutates the command
    /// just before it runs; the teardown hook fires after the child is
    /// reaped.
    pub fn spawn_with(
        command: ProcessCommand,
        sink: Option<DiagnosticSink>,
        setup: Option<Box<dyn FnOnce(&mut Command) + Send>>,
        teardown: Option<TeardownHook>,
    ) -> Result<Self> {
        debug!(command = ?command, merge = command.merge, "spawning test script");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(setup) = setup {
            setup(&mut cmd);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Internal("child stdout was not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Internal("child stderr was not captured".to_string())
        })?;

        // Both readers feed one channel, so backpressure applies to the
        // pipes alike and neither can deadlock against the other. The recv
        // side diverts stderr-tagged lines to the diagnostic sink.
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(read_pipe(stdout, StreamSource::Stdout, tx.clone()));
        let stderr_tag = if command.merge {
            StreamSource::Stdout
        } else {
            StreamSource::Stderr
        };
        tokio::spawn(read_pipe(stderr, stderr_tag, tx));

        let sink = if command.merge {
            None
        } else {
            Some(sink.unwrap_or_else(|| Arc::new(|line: &str| eprint!("{line}"))))
        };

        Ok(Self {
            rx,
            child: Some(child),
            argv: command.argv(),
            sink,
            teardown,
            wait: None,
            exit: None,
            done: false,
        })
    }

    /// Reap the child once both pipes have drained.
    async fn reap(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;

        #[cfg(unix)]
        let wait = {
            use std::os::unix::process::ExitStatusExt;
            status.into_raw()
        };
        #[cfg(not(unix))]
        let wait = status.code().unwrap_or(0);

        #[cfg(unix)]
        let exit = wait >> 8;
        #[cfg(not(unix))]
        let exit = status.code().unwrap_or(0);

        self.wait = Some(wait);
        self.exit = Some(exit);
        self.done = true;
        trace!(wait, exit, "child reaped");

        if let Some(teardown) = self.teardown.take() {
            teardown(&self.argv);
        }
        Ok(())
    }
}

#[async_trait]
impl TapSource for ProcessSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.done {
                return Ok(None);
            }
            match self.rx.recv().await {
                Some((StreamSource::Stdout, line)) => return Ok(Some(line)),
                Some((StreamSource::Stderr, line)) => {
                    if let Some(sink) = &self.sink {
                        sink(&format!("{line}\n"));
                    }
                }
                None => {
                    self.reap().await?;
                    return Ok(None);
                }
            }
        }
    }

    fn wait_status(&self) -> Option<i32> {
        self.wait
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit
    }
}

/// Read one pipe line by line into the shared channel.
async fn read_pipe(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    source: StreamSource,
    tx: mpsc::Sender<(StreamSource, String)>,
) {
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((source, chomp(line))).await.is_err() {
                    // Receiver dropped; nothing left to feed.
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!(?source, "pipe read failed: {err}");
                return;
            }
        }
    }
}
