//! Harness configuration
//!
//! A typed rendition of the classic harness option bag. Unknown options are
//! unrepresentable here; the remaining stringly-typed surfaces (callback
//! names, formatter switches) validate at registration time.

use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Include paths handed to the interpreter as `-I<path>`.
    pub lib: Vec<String>,
    /// Extra interpreter switches; duplicates collapse keeping the first.
    pub switches: Vec<String>,
    /// Interpreter to run scripts with. When unset, scripts are executed
    /// directly.
    pub interpreter: Option<String>,
    /// argv prefix; the test name is appended and the result spawned
    /// verbatim, bypassing interpreter heuristics.
    pub exec: Option<Vec<String>>,
    /// Merge child stderr into the TAP stream.
    pub merge: bool,
    /// Concurrent parsers. 1 means sequential.
    pub jobs: usize,
    /// With jobs > 1, run each test to completion in its own worker and
    /// replay its output on completion instead of multiplexing live.
    pub fork: bool,
    /// Negative quiets, positive gets chattier. 0 is the default one-line
    /// per test.
    pub verbosity: i8,
    /// Show per-test elapsed time.
    pub timer: bool,
    /// Show individual failed-test lines in the default view.
    pub failures: bool,
    /// Show TODO/SKIP directive lines in the default view.
    pub directives: bool,
    /// Force color on/off; `None` leaves it to the terminal.
    pub color: Option<bool>,
    /// Spool a verbatim TAP copy per test under this root. Falls back to
    /// the `TEST_HARNESS_DUMP_TAP` environment variable.
    pub spool_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            lib: Vec::new(),
            switches: Vec::new(),
            interpreter: None,
            exec: None,
            merge: false,
            jobs: 1,
            fork: false,
            verbosity: 0,
            timer: false,
            failures: false,
            directives: false,
            color: None,
            spool_dir: None,
        }
    }
}

impl HarnessConfig {
    /// Check cross-field consistency. Called by `Harness::new` before any
    /// test runs.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::Config("jobs must be at least 1".to_string()));
        }
        if let Some(exec) = &self.exec {
            if exec.is_empty() {
                return Err(Error::Config("exec prefix must not be empty".to_string()));
            }
        }
        if self.exec.is_none()
            && self.interpreter.is_none()
            && !(self.lib.is_empty() && self.switches.is_empty())
        {
            return Err(Error::Config(
                "lib and switches require an interpreter or exec prefix".to_string(),
            ));
        }
        if self.fork && self.jobs == 1 {
            return Err(Error::Config(
                "fork requires jobs greater than 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Switches with duplicates removed, first occurrence winning.
    pub fn deduped_switches(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.switches
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(HarnessConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let config = HarnessConfig {
            jobs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_exec_is_rejected() {
        let config = HarnessConfig {
            exec: Some(vec![]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lib_without_interpreter_is_rejected() {
        let config = HarnessConfig {
            lib: vec!["lib".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HarnessConfig {
            lib: vec!["lib".to_string()],
            interpreter: Some("perl".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fork_requires_parallelism() {
        let config = HarnessConfig {
            fork: true,
            jobs: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HarnessConfig {
            fork: true,
            jobs: 4,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn switches_dedup_keeps_first() {
        let config = HarnessConfig {
            switches: vec!["-w".into(), "-T".into(), "-w".into()],
            interpreter: Some("perl".into()),
            ..Default::default()
        };
        assert_eq!(config.deduped_switches(), vec!["-w", "-T"]);
    }
}
