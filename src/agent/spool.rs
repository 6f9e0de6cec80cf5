//! Disk-backed retry queue for failed deliveries. One JSON document per
//! line; corrupt trailing lines (cut-off writes after a crash) are
//! skipped on drain.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::warn;

pub struct Spool {
    path: PathBuf,
}

impl Spool {
    pub fn new(dir: &Path) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join("delivery-spool.jsonl"),
        })
    }

    pub fn has_backlog(&self) -> bool {
        self.path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    pub async fn append<T: Serialize>(&self, item: &T) -> Result<()> {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Takes everything out of the spool. The file is removed before the
    /// caller retries, so items that fail again are re-appended rather
    /// than duplicated.
    pub async fn drain<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut items = vec![];
        while let Some(line) = lines.next_line().await? {
            match serde_json::from_str::<T>(&line) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!("skipping corrupt spool line in {:?}: {e}", self.path)
                }
            }
        }

        tokio::fs::remove_file(&self.path).await?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    use super::Spool;

    #[tokio::test]
    async fn append_then_drain_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let spool = Spool::new(dir.path())?;
        assert!(!spool.has_backlog());

        spool.append(&"first".to_string()).await?;
        spool.append(&"second".to_string()).await?;
        assert!(spool.has_backlog());

        let items: Vec<String> = spool.drain().await?;
        assert_eq!(items, vec!["first", "second"]);
        assert!(!spool.has_backlog());

        let empty: Vec<String> = spool.drain().await?;
        assert!(empty.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let spool = Spool::new(dir.path())?;
        spool.append(&"kept".to_string()).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("delivery-spool.jsonl"))
            .await?;
        file.write_all(b"{\"cut off").await?;
        file.flush().await?;

        let items: Vec<String> = spool.drain().await?;
        assert_eq!(items, vec!["kept"]);
        Ok(())
    }
}
