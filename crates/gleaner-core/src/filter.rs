//! Quality filter chain.
//!
//! Stages run cheapest first and stop at the first rejection:
//!
//! ```text
//! text length (local) -> resolution (one fetch) -> vision classifier (remote)
//! ```
//!
//! The resolution stage fails closed (a fetch or decode failure rejects),
//! the classifier fails open (a service failure or timeout accepts).

use std::io::Cursor;

use crate::config::RunConfig;
use crate::error::AppError;
use crate::models::{NoteFields, RejectReason, Verdict};
use crate::traits::{Classifier, MediaFetcher};

pub struct FilterChain<M, C>
where
    M: MediaFetcher,
    C: Classifier,
{
    fetcher: M,
    classifier: C,
    config: RunConfig,
}

impl<M, C> FilterChain<M, C>
where
    M: MediaFetcher,
    C: Classifier,
{
    pub fn new(fetcher: M, classifier: C, config: RunConfig) -> Self {
        Self {
            fetcher,
            classifier,
            config,
        }
    }

    pub async fn evaluate(&self, fields: &NoteFields) -> Verdict {
        if self.config.text_filter_enabled() {
            if let Verdict::Reject(r) = self.check_text(&fields.body) {
                return Verdict::Reject(r);
            }
        }

        let first_media = fields.media_urls.first().map(String::as_str);

        if self.config.resolution_filter_enabled() {
            let Some(url) = first_media else {
                return Verdict::Reject(RejectReason::NoMedia);
            };
            if let Verdict::Reject(r) = self.check_resolution(url).await {
                return Verdict::Reject(r);
            }
        }

        if self.config.use_classification_filter {
            let Some(url) = first_media else {
                return Verdict::Reject(RejectReason::NoMedia);
            };
            return self.check_classification(url).await;
        }

        Verdict::Accept
    }

    fn check_text(&self, body: &str) -> Verdict {
        let found = self.config.text_metric.count(body);
        if found < self.config.min_text_len {
            Verdict::Reject(RejectReason::TextTooShort {
                found,
                required: self.config.min_text_len,
            })
        } else {
            Verdict::Accept
        }
    }

    async fn check_resolution(&self, url: &str) -> Verdict {
        let timeout = self.config.probe_timeout();
        let bytes = match tokio::time::timeout(timeout, self.fetcher.fetch_bytes(url)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Verdict::Reject(RejectReason::ProbeFailed(e.to_string())),
            Err(_) => {
                return Verdict::Reject(RejectReason::ProbeFailed(
                    AppError::Timeout(timeout.as_secs()).to_string(),
                ));
            }
        };

        let (width, height) = match image_dimensions(&bytes) {
            Ok(dims) => dims,
            Err(e) => return Verdict::Reject(RejectReason::ProbeFailed(e.to_string())),
        };

        let required = self.config.min_resolution;
        if width < required || height < required {
            Verdict::Reject(RejectReason::ResolutionTooLow {
                width,
                height,
                required,
            })
        } else {
            Verdict::Accept
        }
    }

    async fn check_classification(&self, url: &str) -> Verdict {
        let timeout = self.config.classify_timeout();
        let call = self
            .classifier
            .classify(url, &self.config.classification_prompt);

        let answer = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Classifier unavailable, accepting");
                return Verdict::Accept;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Classifier timed out, accepting"
                );
                return Verdict::Accept;
            }
        };

        if is_affirmative(&answer, &self.config.affirmative_token) {
            Verdict::Accept
        } else {
            tracing::debug!(%answer, "Classifier declined");
            Verdict::Reject(RejectReason::ClassifierDeclined)
        }
    }
}

/// Case-insensitive containment of the affirmative token in the verdict.
pub fn is_affirmative(answer: &str, token: &str) -> bool {
    answer.to_lowercase().contains(&token.to_lowercase())
}

/// Decode only the header of an image to get `(width, height)`.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), AppError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::DecodeError(e.to_string()))?
        .into_dimensions()
        .map_err(|e| AppError::DecodeError(e.to_string()))
}
