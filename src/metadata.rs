//! On-disk bookkeeping for tracked log files.
//!
//! Each tracked file owns one `<uuid>.meta` JSON document in the metadata
//! directory. Writes go to a temp file first and are renamed into place, so a
//! crash never leaves a half-written record behind.

use crate::file_id::FileId;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const META_SUFFIX: &str = ".meta";
// 36 chars of hyphenated uuid plus the suffix.
const META_NAME_LEN: usize = 36 + META_SUFFIX.len();
const TEMP_SUFFIX: &str = ".tmp";
// `<uuid>.meta.<uuid>.tmp`
const TEMP_NAME_LEN: usize = META_NAME_LEN + 1 + 36 + TEMP_SUFFIX.len();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create metadata directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to read metadata directory {}: {source}", path.display())]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("failed to encode metadata for {tracking_id}: {source}")]
    Encode {
        tracking_id: Uuid,
        source: serde_json::Error,
    },
    #[error("failed to write metadata file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Persisted state of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub tracking_id: Uuid,
    pub identity: FileId,
    pub offset: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        let store = Self { dir };
        store.remove_stale_temp_files().await?;
        Ok(store)
    }

    /// Temp files only outlive a save when the process died before the
    /// rename. Nothing else writes them, so any left at open time are stale.
    async fn remove_stale_temp_files(&self) -> Result<(), StoreError> {
        let read_dir_err = |source| StoreError::ReadDir {
            path: self.dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.dir).await.map_err(read_dir_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
            if !is_temp_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale metadata temp file"),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot remove stale metadata temp file")
                }
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, tracking_id: Uuid) -> PathBuf {
        self.dir
            .join(format!("{}{}", tracking_id.hyphenated(), META_SUFFIX))
    }

    pub async fn save(&self, metadata: &FileMetadata) -> Result<(), StoreError> {
        let final_path = self.path_for(metadata.tracking_id);
        let temp_path = self.dir.join(format!(
            "{}{}.{}{}",
            metadata.tracking_id.hyphenated(),
            META_SUFFIX,
            Uuid::new_v4().hyphenated(),
            TEMP_SUFFIX
        ));

        let serialized = serde_json::to_vec(metadata).map_err(|source| StoreError::Encode {
            tracking_id: metadata.tracking_id,
            source,
        })?;

        fs::write(&temp_path, &serialized)
            .await
            .map_err(|source| StoreError::Write {
                path: temp_path.clone(),
                source,
            })?;

        if let Err(source) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                path: final_path,
                source,
            });
        }

        debug!(
            tracking_id = %metadata.tracking_id,
            offset = metadata.offset,
            path = %final_path.display(),
            "persisted file metadata"
        );
        Ok(())
    }

    /// Load every well-formed record in the directory. Entries that cannot be
    /// read or decoded are logged and skipped; only an unreadable directory
    /// is an error.
    pub async fn load_all(&self) -> Result<Vec<FileMetadata>, StoreError> {
        let read_dir_err = |source| StoreError::ReadDir {
            path: self.dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.dir).await.map_err(read_dir_err)?;
        let mut loaded = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
            let path = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                Ok(_) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot stat metadata entry; skipping");
                    continue;
                }
            }

            let Some(expected_id) = tracking_id_from_name(&entry.file_name().to_string_lossy())
            else {
                continue;
            };

            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot read metadata file; skipping");
                    continue;
                }
            };

            match serde_json::from_slice::<FileMetadata>(&raw) {
                Ok(metadata) if metadata.tracking_id == expected_id => loaded.push(metadata),
                Ok(metadata) => warn!(
                    path = %path.display(),
                    tracking_id = %metadata.tracking_id,
                    "metadata file name does not match its tracking id; skipping"
                ),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "malformed metadata file; skipping")
                }
            }
        }

        debug!(dir = %self.dir.display(), count = loaded.len(), "loaded file metadata");
        Ok(loaded)
    }
}

fn tracking_id_from_name(name: &str) -> Option<Uuid> {
    if name.len() != META_NAME_LEN {
        return None;
    }
    let stem = name.strip_suffix(META_SUFFIX)?;
    Uuid::parse_str(stem).ok()
}

fn is_temp_name(name: &str) -> bool {
    if name.len() != TEMP_NAME_LEN {
        return false;
    }
    name.strip_suffix(TEMP_SUFFIX)
        .and_then(|rest| rest.split_once(&format!("{META_SUFFIX}.")))
        .map_or(false, |(id, nonce)| {
            Uuid::parse_str(id).is_ok() && Uuid::parse_str(nonce).is_ok()
        })
}
