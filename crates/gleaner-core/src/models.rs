use std::fmt;

/// A feed card visible in the discovery view.
///
/// Produced by the feed driver on every cycle and discarded after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Stable identifier, usually the card's link.
    pub identifier: String,
    /// Set for cards the pipeline never evaluates (e.g. videos).
    pub ineligible: bool,
}

impl CandidateItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ineligible: false,
        }
    }

    pub fn video(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ineligible: true,
        }
    }
}

/// Fields pulled out of an opened detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFields {
    pub title: Option<String>,
    pub body: String,
    /// Media URLs in page order. May contain duplicates.
    pub media_urls: Vec<String>,
}

/// Result of a lookup that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }
}

/// One durable row of the record log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AcquisitionRecord {
    pub sequence_index: u64,
    pub title: String,
    pub body: String,
    pub source_identifier: String,
    pub media_count: usize,
}

/// Per-candidate download tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Why the filter chain turned a candidate down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TextTooShort { found: usize, required: usize },
    ResolutionTooLow { width: u32, height: u32, required: u32 },
    ProbeFailed(String),
    NoMedia,
    ClassifierDeclined,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TextTooShort { found, required } => {
                write!(f, "text too short ({found} < {required})")
            }
            RejectReason::ResolutionTooLow {
                width,
                height,
                required,
            } => write!(f, "resolution too low ({width}x{height} < {required}px)"),
            RejectReason::ProbeFailed(msg) => write!(f, "resolution probe failed: {msg}"),
            RejectReason::NoMedia => write!(f, "no media"),
            RejectReason::ClassifierDeclined => write!(f, "classifier verdict negative"),
        }
    }
}

/// Filter chain decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}
