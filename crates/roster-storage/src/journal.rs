//! Append-only journal of export intents and their results.
//!
//! Every entry is written once, hash-addressed, through a temp file and an atomic rename, so a
//! crash mid-export leaves the full list of pending directory mutations on disk.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct IntentJournal {
    root: PathBuf,
}

impl IntentJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `{yyyymmdd_hhmmss}/{plan}/{kind}-{hash}.json`
    pub fn entry_relative_path(
        &self,
        recorded_at: DateTime<Utc>,
        plan_id: &str,
        kind: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = recorded_at.format("%Y%m%d_%H%M%S").to_string();
        let plan_dir = plan_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect::<String>();
        let plan_dir = if plan_dir.is_empty() { "unnamed".to_string() } else { plan_dir };
        PathBuf::from(stamp)
            .join(plan_dir)
            .join(format!("{kind}-{content_hash}.json"))
    }

    pub async fn write_json<T: Serialize>(
        &self,
        recorded_at: DateTime<Utc>,
        plan_id: &str,
        kind: &str,
        value: &T,
    ) -> anyhow::Result<JournalEntry> {
        let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {kind}"))?;
        let content_hash = Self::sha256_hex(&bytes);
        let relative_path = self.entry_relative_path(recorded_at, plan_id, kind, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating journal directory {}", parent.display()))?;

        let entry = |deduplicated| JournalEntry {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking journal path {}", absolute_path.display()))?
        {
            return Ok(entry(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp journal file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp journal file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp journal file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                return Ok(entry(true));
            }
            return Err(err).with_context(|| {
                format!(
                    "renaming journal entry {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        info!(path = %relative_path.display(), kind, "journal entry written");
        Ok(entry(false))
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> anyhow::Result<T> {
        let path = path.as_ref();
        let path = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading journal entry {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing journal entry {}", path.display()))
    }
}
