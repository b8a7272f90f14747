// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Spill File
//!
//! Local JSON-lines file holding batches a sink could not accept.
//! One line per batch, each line a JSON array of events.
//!
//! Recovery claims the file by renaming it to `<path>.recovering`, reads it,
//! and deletes it before any event is handed back. A claimed file that is
//! still on disk therefore never had its events re-queued.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tlytics::Event;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum SpillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt spill line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SpillError>;

#[derive(Debug, Clone)]
pub struct SpillFile {
    path: PathBuf,
}

impl SpillFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a file being recovered lives until its events are handed back.
    pub fn recovering_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".recovering");
        PathBuf::from(name)
    }

    /// Append one batch as a single line and sync it to disk.
    pub async fn append(&self, batch: &[Event]) -> Result<()> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Every spilled batch, oldest first. A missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<Vec<Event>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut batches = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let batch = serde_json::from_str(line)
                .map_err(|source| SpillError::Corrupt { line: idx + 1, source })?;
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Claim, read and delete the spilled batches, oldest first.
    ///
    /// `None` when there is nothing to recover. On any error nothing has
    /// been handed out: a corrupt file goes back to [`Self::path`], a file
    /// that could not be deleted stays at [`Self::recovering_path`].
    pub async fn take(&self) -> Result<Option<Vec<Vec<Event>>>> {
        let claimed = self.recovering_path();

        // A leftover claim from an interrupted recovery was never queued
        let fresh = if is_file(&claimed).await? {
            false
        } else if is_file(&self.path).await? {
            tokio::fs::rename(&self.path, &claimed).await?;
            true
        } else {
            return Ok(None);
        };

        let batches = match SpillFile::new(&claimed).read_all().await {
            Ok(batches) => batches,
            Err(e) => {
                if fresh {
                    tokio::fs::rename(&claimed, &self.path).await?;
                }
                return Err(e);
            }
        };
        remove_if_exists(&claimed).await?;
        Ok(Some(batches))
    }
}

async fn is_file(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_then_read() {
        let dir = tempdir().unwrap();
        let spill = SpillFile::new(dir.path().join("spill.jsonl"));

        let first = vec![Event::new("a").at(Utc::now()), Event::new("b").at(Utc::now())];
        let second = vec![Event::new("c").with_field("n", 3).at(Utc::now())];
        spill.append(&first).await.unwrap();
        spill.append(&second).await.unwrap();

        let batches = spill.read_all().await.unwrap();
        assert_eq!(batches, vec![first, second]);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let spill = SpillFile::new(dir.path().join("nothing.jsonl"));
        assert!(spill.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_line_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill.jsonl");
        tokio::fs::write(&path, "[{\"key\":\"ok\"}]\nnot json\n").await.unwrap();

        let err = SpillFile::new(&path).read_all().await.unwrap_err();
        assert!(matches!(err, SpillError::Corrupt { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_take_claims_and_deletes() {
        let dir = tempdir().unwrap();
        let spill = SpillFile::new(dir.path().join("spill.jsonl"));
        assert!(spill.take().await.unwrap().is_none());

        let batch = vec![Event::new("a").at(Utc::now())];
        spill.append(&batch).await.unwrap();

        assert_eq!(spill.take().await.unwrap(), Some(vec![batch]));
        assert!(!spill.path().exists());
        assert!(!spill.recovering_path().exists());
        assert!(spill.take().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_corrupt_file_stays_in_place() {
        let dir = tempdir().unwrap();
        let spill = SpillFile::new(dir.path().join("spill.jsonl"));
        tokio::fs::write(spill.path(), "garbage\n").await.unwrap();

        assert!(matches!(spill.take().await, Err(SpillError::Corrupt { line: 1, .. })));
        assert!(spill.path().exists());
        assert!(!spill.recovering_path().exists());
    }

    #[tokio::test]
    async fn test_take_picks_up_interrupted_claim() {
        let dir = tempdir().unwrap();
        let spill = SpillFile::new(dir.path().join("spill.jsonl"));
        let leftover = SpillFile::new(spill.recovering_path());
        leftover.append(&[Event::new("stranded")]).await.unwrap();

        let batches = spill.take().await.unwrap().unwrap();
        assert_eq!(batches[0][0].key(), "stranded");
        assert!(!spill.recovering_path().exists());
    }
}
