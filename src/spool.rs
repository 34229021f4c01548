//! Verbatim TAP spooling
//!
//! When a dump directory is configured (or `TEST_HARNESS_DUMP_TAP` is set),
//! every test's stdout is copied line-for-line to `<root>/<test-name>`,
//! creating parent directories on demand.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable naming the spool root directory.
pub const DUMP_TAP_ENV: &str = "TEST_HARNESS_DUMP_TAP";

pub struct SpoolWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SpoolWriter {
    /// Open the spool file for one test under `root`, mirroring the test's
    /// own relative path. An absolute test name is re-rooted so the copy
    /// always lands under `root`.
    pub fn create(root: &Path, test_name: &str) -> Result<Self> {
        let path = root.join(test_name.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Spool {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(&path).map_err(|source| Error::Spool {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "spooling TAP");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one raw line (or a raw multi-line block) plus its newline.
    pub fn write_line(&mut self, raw: &str) -> Result<()> {
        self.writer
            .write_all(raw.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|source| Error::Spool {
                path: self.path.clone(),
                source,
            })
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.flush().map_err(|source| Error::Spool {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_verbatim_copy_with_nested_dirs() {
        let root = tempfile::tempdir().unwrap();
        let mut spool = SpoolWriter::create(root.path(), "t/sub/alpha.t").unwrap();
        spool.write_line("1..1").unwrap();
        spool.write_line("ok 1").unwrap();
        spool.close().unwrap();

        let copied = fs::read_to_string(root.path().join("t/sub/alpha.t")).unwrap();
        assert_eq!(copied, "1..1\nok 1\n");
    }
}
