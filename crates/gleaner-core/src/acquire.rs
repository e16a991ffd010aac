use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;

use crate::error::AppError;
use crate::models::AcquisitionOutcome;
use crate::traits::MediaFetcher;

/// Extension given to every downloaded media file.
pub const MEDIA_EXTENSION: &str = "jpg";

/// Downloads the media batch of one accepted candidate.
///
/// Fetches run concurrently and are all awaited before anything is written.
/// Successful downloads are stored as `1.jpg..=K.jpg` in the order their
/// URLs appeared, so a failed URL never leaves a gap in the file names.
pub struct MediaAcquirer<M: MediaFetcher> {
    fetcher: M,
    media_cap: usize,
    timeout: Duration,
}

impl<M: MediaFetcher> MediaAcquirer<M> {
    pub fn new(fetcher: M, media_cap: usize, timeout: Duration) -> Self {
        Self {
            fetcher,
            media_cap,
            timeout,
        }
    }

    /// Download into an existing directory and report the tally.
    pub async fn acquire(&self, urls: &[String], dir: &Path) -> AcquisitionOutcome {
        let batch = select_batch(urls, self.media_cap);

        let fetches = batch.iter().map(|url| async move {
            match tokio::time::timeout(self.timeout, self.fetcher.fetch_bytes(url)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
            }
        });
        let results = join_all(fetches).await;

        let mut succeeded = 0;
        for (url, result) in batch.iter().zip(results) {
            let bytes = match result {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    tracing::warn!(%url, "Empty media response");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Media download failed");
                    continue;
                }
            };

            let path = media_path(dir, succeeded + 1);
            match tokio::fs::write(&path, &bytes).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write media");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        AcquisitionOutcome {
            attempted: batch.len(),
            succeeded,
        }
    }
}

/// De-duplicate (first occurrence wins) and truncate to `cap`.
pub fn select_batch(urls: &[String], cap: usize) -> Vec<&str> {
    let mut seen = HashSet::new();
    urls.iter()
        .map(String::as_str)
        .filter(|u| seen.insert(*u))
        .take(cap)
        .collect()
}

/// `<dir>/<ordinal>.jpg`, ordinals starting at 1.
pub fn media_path(dir: &Path, ordinal: usize) -> PathBuf {
    dir.join(format!("{ordinal}.{MEDIA_EXTENSION}"))
}
