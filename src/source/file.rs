//! File-backed line source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{chomp, TapSource};
use crate::error::Result;

pub struct FileSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    done: bool,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TapSource for FileSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(chomp(line))),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_lines_and_strips_endings() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "1..2\r\nok 1\nok 2\n").unwrap();

        let mut source = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("1..2"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("ok 1"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("ok 2"));
        assert_eq!(source.next_line().await.unwrap(), None);
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        assert!(FileSource::open("/nonexistent/tap/stream").await.is_err());
    }
}
