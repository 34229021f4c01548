#![cfg(unix)]

//! End-to-end harness runs against real child processes, using an
//! injected recording formatter instead of the console.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tappet::harness::{Formatter, Harness, HarnessConfig, Session};
use tappet::parse::ParserSummary;
use tappet::TapEvent;

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[derive(Clone, Default)]
struct Recording {
    events: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<Mutex<Vec<(String, ParserSummary)>>>,
}

struct RecordingSession {
    name: String,
    recording: Recording,
}

impl Formatter for Recording {
    fn open(&mut self, _names: &[String]) {}
    fn session(&mut self, name: &str) -> Box<dyn Session> {
        Box::new(RecordingSession {
            name: name.to_string(),
            recording: self.clone(),
        })
    }
    fn summary(&mut self, _aggregator: &tappet::Aggregator) {}
}

impl Session for RecordingSession {
    fn result(&mut self, event: &TapEvent) {
        self.recording
            .events
            .lock()
            .unwrap()
            .push((self.name.clone(), event.raw().to_string()));
    }
    fn close(&mut self, summary: &ParserSummary) {
        self.recording
            .closed
            .lock()
            .unwrap()
            .push((self.name.clone(), summary.clone()));
    }
}

fn harness_with(config: HarnessConfig) -> (Harness, Recording) {
    let recording = Recording::default();
    let harness = Harness::with_formatter(config, Box::new(recording.clone())).unwrap();
    (harness, recording)
}

#[tokio::test]
async fn exit_status_flows_into_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_script(dir.path(), "good.t", "echo '1..1'; echo 'ok 1'");
    let angry = write_script(
        dir.path(),
        "angry.t",
        "echo '1..1'; echo 'ok 1'; exit 7",
    );

    let (mut harness, recording) = harness_with(HarnessConfig::default());
    let outcome = harness.run(&[good, angry]).await.unwrap();

    let closed = recording.closed.lock().unwrap();
    let angry_summary = &closed
        .iter()
        .find(|(name, _)| name.ends_with("angry.t"))
        .unwrap()
        .1;
    assert_eq!(angry_summary.exit, Some(7));
    assert!(angry_summary.has_problems);

    // The clean test passed; the non-zero exit makes the run fail.
    assert_eq!(outcome.aggregator.failed(), 0);
    assert_eq!(outcome.aggregator.bad(), 1);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn stderr_is_kept_out_of_the_tap_stream() {
    let dir = tempfile::tempdir().unwrap();
    let noisy = write_script(
        dir.path(),
        "noisy.t",
        "echo '1..1'; echo 'this is a warning' >&2; echo 'ok 1'",
    );

    let (mut harness, recording) = harness_with(HarnessConfig::default());
    let outcome = harness.run(&[noisy]).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    let events = recording.events.lock().unwrap();
    assert!(events.iter().all(|(_, raw)| !raw.contains("warning")));
}

#[tokio::test]
async fn merge_pulls_stderr_into_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let noisy = write_script(
        dir.path(),
        "merged.t",
        "echo '1..1'; echo '# diagnostic from stderr' >&2; sleep 0.05; echo 'ok 1'",
    );

    let config = HarnessConfig {
        merge: true,
        ..Default::default()
    };
    let (mut harness, recording) = harness_with(config);
    let outcome = harness.run(&[noisy]).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    let events = recording.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|(_, raw)| raw.contains("diagnostic from stderr")));
}

#[tokio::test]
async fn parallel_strategies_agree_with_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = vec![
        write_script(dir.path(), "a.t", "echo '1..2'; echo 'ok 1'; echo 'ok 2'"),
        write_script(
            dir.path(),
            "b.t",
            "echo '1..2'; sleep 0.05; echo 'not ok 1'; echo 'ok 2 # TODO later'",
        ),
        write_script(dir.path(), "c.t", "echo '1..0 # SKIP nope'"),
    ];

    let mut totals = Vec::new();
    for (jobs, fork) in [(1, false), (3, false), (3, true)] {
        let config = HarnessConfig {
            jobs,
            fork,
            ..Default::default()
        };
        let (mut harness, _) = harness_with(config);
        let outcome = harness.run(&scripts).await.unwrap();
        let agg = &outcome.aggregator;
        totals.push((
            agg.files(),
            agg.total(),
            agg.passed(),
            agg.failed(),
            agg.todo(),
            agg.skipped(),
            outcome.exit_code(),
        ));
    }

    assert_eq!(totals[0], totals[1]);
    assert_eq!(totals[0], totals[2]);
    assert_eq!(totals[0], (3, 4, 3, 1, 1, 0, 1));
}

#[tokio::test]
async fn yaml_diagnostics_reach_the_formatter() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "yaml.t",
        concat!(
            "echo 'TAP version 13'\n",
            "echo '1..1'\n",
            "echo 'not ok 1 - mismatch'\n",
            "echo '  ---'\n",
            "echo '  got: 42'\n",
            "echo '  expected: 47'\n",
            "echo '  ...'",
        ),
    );

    let (mut harness, recording) = harness_with(HarnessConfig::default());
    harness.run(&[script]).await.unwrap();

    let events = recording.events.lock().unwrap();
    assert!(events.iter().any(|(_, raw)| raw.contains("got: 42")));
    let closed = recording.closed.lock().unwrap();
    assert!(closed[0].1.parse_errors.is_empty());
    assert_eq!(closed[0].1.version, 13);
}
