use std::future::Future;

use crate::error::AppError;
use crate::models::{AcquisitionRecord, CandidateItem, Lookup, NoteFields};

/// Session handle over a live, scrollable feed.
///
/// Implementations own whatever automation session they need; the
/// harvester only talks to the feed through this trait.
pub trait FeedDriver: Send + Sync {
    /// Handle to an opened detail view.
    type View: Send + Sync;

    /// Cards currently rendered in the discovery view, in display order.
    fn current_candidates(
        &self,
    ) -> impl Future<Output = Result<Vec<CandidateItem>, AppError>> + Send;

    /// Scroll or paginate so that more cards become visible.
    fn reveal_more(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Open a card's detail view. `NotFound` means the view never appeared.
    fn open(
        &self,
        candidate: &CandidateItem,
    ) -> impl Future<Output = Result<Lookup<Self::View>, AppError>> + Send;

    /// Pull title, body and media URLs out of an opened detail view.
    fn extract(
        &self,
        view: &Self::View,
    ) -> impl Future<Output = Result<NoteFields, AppError>> + Send;

    /// Restore the discovery view after handling a candidate.
    fn return_to_feed(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Raw markup of the discovery view, written out when a run finds nothing.
    fn snapshot(&self) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Downloads raw media bytes.
pub trait MediaFetcher: Send + Sync + Clone {
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Vision-language classification service.
pub trait Classifier: Send + Sync + Clone {
    /// Sends the image and instruction, returning the model's raw text verdict.
    fn classify(
        &self,
        image_url: &str,
        instruction: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Append-only sink for acquisition records.
///
/// Owns the sequence counter: `next_index` only advances on a successful
/// `commit`.
pub trait RecordStore: Send {
    /// Index the next committed record will carry.
    fn next_index(&self) -> u64;

    /// Durably append one record. Must not return until the row is on disk.
    fn commit(&mut self, record: &AcquisitionRecord) -> Result<(), AppError>;
}

/// A no-op classifier used when no API key is configured.
///
/// Always answers with an error, which the filter chain treats as fail-open.
#[derive(Debug, Clone)]
pub struct NullClassifier;

impl Classifier for NullClassifier {
    async fn classify(&self, _image_url: &str, _instruction: &str) -> Result<String, AppError> {
        Err(AppError::ClassifierError {
            message: "no classifier configured".into(),
            status_code: 0,
        })
    }
}
