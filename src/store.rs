//! Persistent document store
//! One JSON document holds every member record, card preference and timed grant
//!
//! The document is read once at startup and rewritten whole on every save.
//! Saves go to a sibling `.tmp` file that is then renamed over the target, so
//! a crash mid-write leaves the previous document intact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::progression::{CardPreference, Ledger, MemberId};
use crate::scheduler::TimedGrant;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The full durable state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub progression: Ledger,
    #[serde(default)]
    pub card_preferences: HashMap<MemberId, CardPreference>,
    #[serde(default)]
    pub timed_grants: Vec<TimedGrant>,
}

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. Missing or malformed content yields empty state.
    pub async fn load(&self) -> Document {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<Document>(&contents) {
                Ok(document) => {
                    tracing::info!(
                        "Loaded store {:?}: {} members, {} card preferences, {} timed grants",
                        self.path,
                        document.progression.len(),
                        document.card_preferences.len(),
                        document.timed_grants.len()
                    );
                    return document;
                }
                Err(e) => tracing::warn!("Failed to parse store {:?}, starting empty: {}", self.path, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No store at {:?}, starting empty", self.path);
            }
            Err(e) => tracing::warn!("Failed to read store {:?}, starting empty: {}", self.path, e),
        }

        Document::default()
    }

    /// Serialize and atomically replace the document on disk
    pub async fn save(&self, document: &Document) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(|source| self.io_error(&temp_path, source))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| self.io_error(&self.path, source))?;

        tracing::debug!("Saved store to {:?}", self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
