//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::{AcquisitionRecord, CandidateItem, Lookup, NoteFields};
use crate::traits::{Classifier, FeedDriver, MediaFetcher, RecordStore};

/// Encode a blank PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Note fields with `n` media URLs under `https://cdn/<tag>/`.
pub fn note_with_media(tag: &str, n: usize) -> NoteFields {
    NoteFields {
        title: Some(format!("title {tag}")),
        body: format!("body of {tag}"),
        media_urls: (1..=n).map(|i| format!("https://cdn/{tag}/{i}")).collect(),
    }
}

// ---------------------------------------------------------------------------
// MockMediaFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving bytes by URL. Unknown URLs answer with an HTTP error.
#[derive(Clone, Default)]
pub struct MockMediaFetcher {
    bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requested: Arc<Mutex<Vec<String>>>,
    hang: bool,
}

impl MockMediaFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(self, url: &str, bytes: Vec<u8>) -> Self {
        self.bodies.lock().unwrap().insert(url.to_string(), bytes);
        self
    }

    pub fn with_image(self, url: &str, width: u32, height: u32) -> Self {
        self.with_bytes(url, png_bytes(width, height))
    }

    /// Serve `bytes` for every URL of the given note.
    pub fn serving(self, note: &NoteFields, bytes: &[u8]) -> Self {
        for url in &note.media_urls {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.clone(), bytes.to_vec());
        }
        self
    }

    /// Every request never completes.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl MediaFetcher for MockMediaFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.requested.lock().unwrap().push(url.to_string());
        if self.hang {
            std::future::pending::<()>().await;
        }
        let body = self.bodies.lock().unwrap().get(url).cloned();
        body.ok_or_else(|| AppError::HttpError(format!("HTTP 404 for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockClassifier
// ---------------------------------------------------------------------------

/// Mock classifier returning a fixed verdict, optionally failing first.
#[derive(Clone)]
pub struct MockClassifier {
    answer: Arc<Mutex<String>>,
    error: Arc<Mutex<Option<AppError>>>,
    hang: bool,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockClassifier {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Arc::new(Mutex::new(answer.to_string())),
            error: Arc::new(Mutex::new(None)),
            hang: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails the first call with `error`, then answers "yes".
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
            ..Self::answering("yes")
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::answering("no")
        }
    }

    /// Recorded `(image_url, instruction)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Classifier for MockClassifier {
    async fn classify(&self, image_url: &str, instruction: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((image_url.to_string(), instruction.to_string()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.answer.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MockFeedDriver
// ---------------------------------------------------------------------------

/// Mock feed: a first visible page plus pages revealed one per `reveal_more`.
///
/// Cards stay visible once revealed, so every call to `current_candidates`
/// re-surfaces identifiers the harvester has already handled.
#[derive(Clone, Default)]
pub struct MockFeedDriver {
    visible: Arc<Mutex<Vec<CandidateItem>>>,
    pending_pages: Arc<Mutex<Vec<Vec<CandidateItem>>>>,
    notes: Arc<Mutex<HashMap<String, NoteFields>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
    reveals: Arc<Mutex<u32>>,
    returns: Arc<Mutex<u32>>,
}

impl MockFeedDriver {
    pub fn new(first_page: Vec<CandidateItem>) -> Self {
        Self {
            visible: Arc::new(Mutex::new(first_page)),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: Vec<CandidateItem>) -> Self {
        self.pending_pages.lock().unwrap().push(page);
        self
    }

    /// Register the detail fields returned when `id` is opened.
    /// Opening an id with no registered note succeeds but extraction fails.
    pub fn with_note(self, id: &str, fields: NoteFields) -> Self {
        self.notes.lock().unwrap().insert(id.to_string(), fields);
        self
    }

    /// Opening `id` reports that the detail view never appeared.
    pub fn with_missing(self, id: &str) -> Self {
        self.missing.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn reveal_count(&self) -> u32 {
        *self.reveals.lock().unwrap()
    }

    pub fn return_count(&self) -> u32 {
        *self.returns.lock().unwrap()
    }
}

impl FeedDriver for MockFeedDriver {
    type View = String;

    async fn current_candidates(&self) -> Result<Vec<CandidateItem>, AppError> {
        Ok(self.visible.lock().unwrap().clone())
    }

    async fn reveal_more(&self) -> Result<(), AppError> {
        *self.reveals.lock().unwrap() += 1;
        let mut pages = self.pending_pages.lock().unwrap();
        if !pages.is_empty() {
            let page = pages.remove(0);
            self.visible.lock().unwrap().extend(page);
        }
        Ok(())
    }

    async fn open(&self, candidate: &CandidateItem) -> Result<Lookup<String>, AppError> {
        self.opened
            .lock()
            .unwrap()
            .push(candidate.identifier.clone());
        if self.missing.lock().unwrap().contains(&candidate.identifier) {
            return Ok(Lookup::NotFound);
        }
        Ok(Lookup::Found(candidate.identifier.clone()))
    }

    async fn extract(&self, view: &String) -> Result<NoteFields, AppError> {
        self.notes
            .lock()
            .unwrap()
            .get(view)
            .cloned()
            .ok_or_else(|| AppError::ExtractionError(format!("no .desc in {view}")))
    }

    async fn return_to_feed(&self) -> Result<(), AppError> {
        *self.returns.lock().unwrap() += 1;
        Ok(())
    }

    async fn snapshot(&self) -> Result<String, AppError> {
        Ok("<html><body>feed</body></html>".to_string())
    }
}

// ---------------------------------------------------------------------------
// MockRecordStore
// ---------------------------------------------------------------------------

/// In-memory record store with an optional commit failure.
#[derive(Clone)]
pub struct MockRecordStore {
    pub committed: Arc<Mutex<Vec<AcquisitionRecord>>>,
    next: Arc<Mutex<u64>>,
    commit_error: Arc<Mutex<Option<AppError>>>,
    sabotage: Option<PathBuf>,
}

impl MockRecordStore {
    pub fn empty() -> Self {
        Self {
            committed: Arc::new(Mutex::new(Vec::new())),
            next: Arc::new(Mutex::new(1)),
            commit_error: Arc::new(Mutex::new(None)),
            sabotage: None,
        }
    }

    pub fn with_commit_error(error: AppError) -> Self {
        Self {
            commit_error: Arc::new(Mutex::new(Some(error))),
            ..Self::empty()
        }
    }

    /// On a failing commit, swap the directory at `dir` for a plain file so
    /// that removing it as a directory fails.
    pub fn replacing_dir_with_file(mut self, dir: PathBuf) -> Self {
        self.sabotage = Some(dir);
        self
    }
}

impl RecordStore for MockRecordStore {
    fn next_index(&self) -> u64 {
        *self.next.lock().unwrap()
    }

    fn commit(&mut self, record: &AcquisitionRecord) -> Result<(), AppError> {
        if let Some(e) = self.commit_error.lock().unwrap().take() {
            if let Some(dir) = &self.sabotage {
                std::fs::remove_dir_all(dir).unwrap();
                std::fs::write(dir, b"").unwrap();
            }
            return Err(e);
        }
        self.committed.lock().unwrap().push(record.clone());
        *self.next.lock().unwrap() += 1;
        Ok(())
    }
}
