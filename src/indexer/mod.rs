//! Catalog refresh: download the remote bulk card file and load it into the
//! local store.

pub mod resolver;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;

use crate::model::types::CardRecord;
use crate::search::remote::{RemoteError, ScryfallClient};
use crate::storage::sqlite::{CardStore, ImportError};

/// Bulk file kind holding one record per oracle card.
pub const ORACLE_CARDS: &str = "oracle_cards";

pub const SUCCESS_MESSAGE: &str = "Database updated successfully.";

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bulk file is not a card array: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Import(#[from] ImportError),
}

/// One progress report. `percent` runs 0 to 100 across the whole update:
/// downloading fills the first half, importing the second.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportProgress {
    pub percent: f64,
    pub current: usize,
    pub total: usize,
    pub status: String,
}

impl ImportProgress {
    fn phase(percent: f64, status: impl Into<String>) -> Self {
        Self {
            percent,
            current: 0,
            total: 0,
            status: status.into(),
        }
    }
}

/// Where bulk card files come from.
pub trait BulkSource: Send + Sync {
    fn bulk_data_uri(&self, kind: &str) -> Result<String, RemoteError>;

    /// Fetch `uri`, calling `on_chunk(downloaded, content_length)` as bytes
    /// arrive.
    fn download(
        &self,
        uri: &str,
        on_chunk: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<Vec<u8>, RemoteError>;
}

impl BulkSource for ScryfallClient {
    fn bulk_data_uri(&self, kind: &str) -> Result<String, RemoteError> {
        ScryfallClient::bulk_data_uri(self, kind)
    }

    fn download(
        &self,
        uri: &str,
        on_chunk: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<Vec<u8>, RemoteError> {
        ScryfallClient::download(self, uri, on_chunk)
    }
}

pub struct CatalogImporter {
    store: Arc<CardStore>,
    source: Arc<dyn BulkSource>,
}

impl CatalogImporter {
    pub fn new(store: Arc<CardStore>, source: Arc<dyn BulkSource>) -> Self {
        Self { store, source }
    }

    /// Refresh the store on a worker thread.
    ///
    /// `completion` runs exactly once with `(true, "Database updated
    /// successfully.")` or `(false, "Update failed: <reason>")`.
    pub fn update_database<P, C>(self: &Arc<Self>, mut progress: P, completion: C) -> JoinHandle<()>
    where
        P: FnMut(ImportProgress) + Send + 'static,
        C: FnOnce(bool, String) + Send + 'static,
    {
        let this = Arc::clone(self);
        thread::spawn(move || match this.update_blocking(&mut progress) {
            Ok(_) => completion(true, SUCCESS_MESSAGE.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "catalog update failed");
                completion(false, format!("Update failed: {e}"))
            }
        })
    }

    /// Download and import on the current thread. Returns the number of
    /// records written.
    pub fn update_blocking(
        &self,
        progress: &mut dyn FnMut(ImportProgress),
    ) -> Result<usize, UpdateError> {
        let start = Instant::now();
        progress(ImportProgress::phase(0.0, "Fetching bulk data info..."));
        let uri = self.source.bulk_data_uri(ORACLE_CARDS)?;
        tracing::info!(uri = uri.as_str(), "bulk_download_start");

        progress(ImportProgress::phase(0.0, "Downloading card data..."));
        let mut last_whole = None;
        let bytes = self.source.download(&uri, &mut |done, total| {
            let Some(total) = total else {
                return;
            };
            let percent = (done as f64 / total as f64 * 50.0).min(50.0);
            let whole = percent as u32;
            if last_whole != Some(whole) {
                last_whole = Some(whole);
                progress(ImportProgress::phase(percent, "Downloading card data..."));
            }
        })?;
        if last_whole.is_none() {
            // length unknown, so nothing was reported while downloading
            progress(ImportProgress::phase(50.0, "Download complete"));
        }
        tracing::info!(
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "bulk_download_done"
        );

        self.import_bytes(&bytes, 50.0, progress)
    }

    /// Import a bulk card file already on disk. Progress spans 0 to 100.
    pub fn import_file(
        &self,
        path: &Path,
        progress: &mut dyn FnMut(ImportProgress),
    ) -> Result<usize, UpdateError> {
        progress(ImportProgress::phase(0.0, format!("Reading {}", path.display())));
        let bytes = fs::read(path).map_err(|source| UpdateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.import_bytes(&bytes, 0.0, progress)
    }

    fn import_bytes(
        &self,
        bytes: &[u8],
        base: f64,
        progress: &mut dyn FnMut(ImportProgress),
    ) -> Result<usize, UpdateError> {
        let cards: Vec<CardRecord> = serde_json::from_slice(bytes)?;
        let span = 100.0 - base;
        let written = self.store.bulk_upsert(&cards, |index, total, name| {
            progress(ImportProgress {
                percent: base + index as f64 / total.max(1) as f64 * span,
                current: index,
                total,
                status: format!("Importing: {name}"),
            });
        })?;
        progress(ImportProgress {
            percent: 100.0,
            current: written,
            total: written,
            status: "Import complete".to_string(),
        });
        Ok(written)
    }
}
