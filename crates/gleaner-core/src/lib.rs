pub mod acquire;
pub mod audit;
pub mod config;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod harvest;
pub mod models;
pub mod store;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use config::RunConfig;
pub use error::AppError;
pub use harvest::{Harvester, RunSummary, StopReason, TracingHarvestReporter};
pub use models::{AcquisitionRecord, CandidateItem, Lookup, NoteFields};
pub use store::{ArtifactStore, CsvRecordLog};
pub use traits::{Classifier, FeedDriver, MediaFetcher, RecordStore};
