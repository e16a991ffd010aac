#[cfg(feature = "browser")]
pub mod browser;
pub mod extract;
pub mod media;
pub mod vision;

#[cfg(test)]
mod testutil;

#[cfg(feature = "browser")]
pub use browser::{BrowserOptions, ChromiumFeedDriver, DetailView, search_url};
pub use extract::{FeedSelectors, NoteExtractor};
pub use media::ReqwestMediaFetcher;
pub use vision::OpenAiClassifier;
