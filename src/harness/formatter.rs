//! Output formatting
//!
//! The engine drives a [`Formatter`] through a narrow callback protocol:
//! one [`Session`] per test file, fed results in source order, closed with
//! the finalized summary. The console implementation here is deliberately
//! thin; anything fancier plugs in through the same traits.

use colored::Colorize;

use super::aggregator::{Aggregator, RunStatus};
use crate::parse::{ParserSummary, TapEvent};

/// Formatter-side state for one test file's stream.
pub trait Session: Send {
    /// One parser result, in source order.
    fn result(&mut self, event: &TapEvent);
    /// The stream ended; render the per-file verdict.
    fn close(&mut self, summary: &ParserSummary);
}

pub trait Formatter: Send {
    /// The run is starting with these test names.
    fn open(&mut self, names: &[String]);
    /// Create the session for one test file.
    fn session(&mut self, name: &str) -> Box<dyn Session>;
    /// The run is over; render the aggregate footer.
    fn summary(&mut self, aggregator: &Aggregator);
}

/// Classic `prove`-style console renderer.
pub struct ConsoleFormatter {
    verbosity: i8,
    timer: bool,
    failures: bool,
    directives: bool,
    name_width: usize,
}

impl ConsoleFormatter {
    pub fn new(verbosity: i8, timer: bool, failures: bool, directives: bool) -> Self {
        Self {
            verbosity,
            timer,
            failures,
            directives,
            name_width: 0,
        }
    }

    /// Force or suppress color for the whole process.
    pub fn set_color(color: Option<bool>) {
        if let Some(on) = color {
            colored::control::set_override(on);
        }
    }
}

impl Formatter for ConsoleFormatter {
    fn open(&mut self, names: &[String]) {
        self.name_width = names.iter().map(|n| n.len()).max().unwrap_or(0);
    }

    fn session(&mut self, name: &str) -> Box<dyn Session> {
        Box::new(ConsoleSession {
            name: name.to_string(),
            name_width: self.name_width,
            verbosity: self.verbosity,
            timer: self.timer,
            failures: self.failures,
            directives: self.directives,
            failed_lines: Vec::new(),
            directive_lines: Vec::new(),
            bailout: None,
        })
    }

    fn summary(&mut self, aggregator: &Aggregator) {
        if self.verbosity < -1 {
            return;
        }
        let status = aggregator.status();
        if status == RunStatus::Pass && !aggregator.has_problems() {
            println!("{}", "All tests successful.".green());
        }
        for name in aggregator.names() {
            let summary = aggregator.summary(name).expect("aggregated name");
            if !summary.has_problems {
                continue;
            }
            println!(
                "{} (Wstat: {} Tests: {} Failed: {})",
                name.red(),
                summary.wait.unwrap_or(0),
                summary.tests_run,
                summary.failed,
            );
            for error in &summary.parse_errors {
                println!("  Parse error: {error}");
            }
        }
        println!(
            "Files={}, Tests={}, {:.2} wallclock secs",
            aggregator.files(),
            aggregator.total(),
            aggregator.elapsed().as_secs_f64(),
        );
        let verdict = aggregator.description();
        match status {
            RunStatus::Fail => println!("{}", verdict.red()),
            _ => println!("{verdict}"),
        }
    }
}

struct ConsoleSession {
    name: String,
    name_width: usize,
    verbosity: i8,
    timer: bool,
    failures: bool,
    directives: bool,
    failed_lines: Vec<String>,
    directive_lines: Vec<String>,
    bailout: Option<String>,
}

impl Session for ConsoleSession {
    fn result(&mut self, event: &TapEvent) {
        if self.verbosity >= 1 {
            println!("{}", event.raw());
            return;
        }
        match event {
            TapEvent::Test(test) => {
                if !test.is_ok() {
                    self.failed_lines.push(test.raw.clone());
                }
                if test.directive.is_some() {
                    self.directive_lines.push(test.raw.clone());
                }
            }
            TapEvent::Bailout { reason, .. } => {
                self.bailout = Some(reason.clone());
            }
            _ => {}
        }
    }

    fn close(&mut self, summary: &ParserSummary) {
        if self.verbosity < 0 && !summary.has_problems {
            return;
        }
        let label = format!("{:w$} ..", self.name, w = self.name_width);
        let verdict = if let Some(reason) = &self.bailout {
            format!("{} {}", "Bailed out!".red().bold(), reason)
        } else if summary.skip_all {
            match &summary.skip_all_reason {
                Some(reason) if !reason.is_empty() => format!("skipped: {reason}"),
                _ => "skipped".to_string(),
            }
        } else if summary.has_problems {
            format!(
                "{} {}/{} subtests",
                "Failed".red(),
                summary.failed,
                summary.tests_run
            )
        } else {
            "ok".green().to_string()
        };
        let elapsed = if self.timer {
            format!(" [{:>8.3} s]", summary.elapsed.as_secs_f64())
        } else {
            String::new()
        };
        println!("{label} {verdict}{elapsed}");

        if self.failures && !self.failed_lines.is_empty() {
            for line in &self.failed_lines {
                println!("    {}", line.red());
            }
        }
        if self.directives && !self.directive_lines.is_empty() {
            for line in &self.directive_lines {
                println!("    {line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rendering goes to stdout; these tests cover the bookkeeping only.

    #[test]
    fn open_computes_name_width() {
        let mut formatter = ConsoleFormatter::new(0, false, false, false);
        formatter.open(&["t/a.t".to_string(), "t/longer-name.t".to_string()]);
        assert_eq!(formatter.name_width, 15);
    }

    #[test]
    fn session_collects_failures_and_directives() {
        let mut session = ConsoleSession {
            name: "t/a.t".into(),
            name_width: 5,
            verbosity: 0,
            timer: false,
            failures: true,
            directives: true,
            failed_lines: Vec::new(),
            directive_lines: Vec::new(),
            bailout: None,
        };

        session.result(&TapEvent::Test(crate::parse::TestResult {
            number: 1,
            declared: Some(1),
            actual_ok: false,
            description: "- broken".into(),
            directive: None,
            explanation: String::new(),
            raw: "not ok 1 - broken".into(),
        }));
        session.result(&TapEvent::Test(crate::parse::TestResult {
            number: 2,
            declared: Some(2),
            actual_ok: true,
            description: String::new(),
            directive: Some(crate::grammar::Directive::Skip),
            explanation: "no tty".into(),
            raw: "ok 2 # SKIP no tty".into(),
        }));
        session.result(&TapEvent::Bailout {
            reason: "db down".into(),
            raw: "Bail out! db down".into(),
        });

        assert_eq!(session.failed_lines, vec!["not ok 1 - broken"]);
        assert_eq!(session.directive_lines, vec!["ok 2 # SKIP no tty"]);
        assert_eq!(session.bailout.as_deref(), Some("db down"));
    }
}
