//! The discovery loop.
//!
//! ```text
//! Searching --(found)--> Evaluating --> Acquiring --> Persisting | RollingBack --> Searching
//! Searching --(nothing new)--> Scrolling --> Searching
//! Searching --(target reached | feed exhausted | cancelled | fatal)--> Done
//! ```
//!
//! One candidate is handled at a time. The seen set belongs to the loop and
//! the sequence counter to the record store, so acceptance is strictly
//! serialized.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::acquire::MediaAcquirer;
use crate::config::RunConfig;
use crate::dedup::SeenSet;
use crate::error::AppError;
use crate::filter::FilterChain;
use crate::models::{
    AcquisitionOutcome, AcquisitionRecord, CandidateItem, Lookup, RejectReason, Verdict,
};
use crate::store::ArtifactStore;
use crate::traits::{Classifier, FeedDriver, MediaFetcher, RecordStore};

const UNTITLED: &str = "Untitled";

/// Loop states, reported as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Searching,
    Scrolling,
    Evaluating,
    Acquiring,
    Persisting,
    RollingBack,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Searching => "searching",
            Phase::Scrolling => "scrolling",
            Phase::Evaluating => "evaluating",
            Phase::Acquiring => "acquiring",
            Phase::Persisting => "persisting",
            Phase::RollingBack => "rolling-back",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// Too many consecutive cycles surfaced nothing new.
    FeedExhausted,
    Cancelled,
    /// The record log could not be written; nothing after it was attempted.
    Fatal(String),
}

/// What happened to one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Accepted {
        index: u64,
        media: AcquisitionOutcome,
    },
    Rejected(RejectReason),
    /// Navigation or extraction failed; the candidate stays seen.
    Skipped(String),
    /// Accepted but no media could be downloaded; its directory was removed.
    RolledBack(AcquisitionOutcome),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target: u64,
    pub accepted: u64,
    pub evaluated: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub rolled_back: u64,
    pub reveals: u64,
    pub stop_reason: StopReason,
    pub snapshot: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn new(run_id: Uuid, target: u64) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            target,
            accepted: 0,
            evaluated: 0,
            rejected: 0,
            skipped: 0,
            rolled_back: 0,
            reveals: 0,
            stop_reason: StopReason::TargetReached,
            snapshot: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// One-line tally, e.g. `accepted 3/10`.
    pub fn tally(&self) -> String {
        format!("accepted {}/{}", self.accepted, self.target)
    }
}

/// Events emitted by the harvester for monitoring/logging.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    Started {
        run_id: Uuid,
        target: u64,
        next_index: u64,
    },
    InterruptedSwept {
        index: u64,
    },
    Phase(Phase),
    Scrolling {
        attempt: u32,
        max_attempts: u32,
    },
    CandidateFound {
        identifier: &'a str,
    },
    Handled {
        identifier: &'a str,
        outcome: &'a CandidateOutcome,
    },
    Fatal {
        identifier: &'a str,
        error: &'a AppError,
    },
    Warning {
        action: &'a str,
        error: &'a AppError,
    },
    SnapshotSaved {
        path: &'a std::path::Path,
    },
    Finished {
        summary: &'a RunSummary,
    },
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarvestReporter;

impl HarvestReporter for TracingHarvestReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::Started {
                run_id,
                target,
                next_index,
            } => {
                tracing::info!(%run_id, %target, %next_index, "Harvest started");
            }
            HarvestEvent::InterruptedSwept { index } => {
                tracing::warn!(%index, "Removed artifact directory left by an interrupted run");
            }
            HarvestEvent::Phase(phase) => {
                tracing::debug!(%phase, "Phase");
            }
            HarvestEvent::Scrolling {
                attempt,
                max_attempts,
            } => {
                tracing::info!(%attempt, %max_attempts, "Nothing new visible, scrolling");
            }
            HarvestEvent::CandidateFound { identifier } => {
                tracing::info!(%identifier, "Evaluating");
            }
            HarvestEvent::Handled {
                identifier,
                outcome,
            } => match outcome {
                CandidateOutcome::Accepted { index, media } => {
                    tracing::info!(
                        %identifier,
                        %index,
                        saved = media.succeeded,
                        attempted = media.attempted,
                        "Saved"
                    );
                }
                CandidateOutcome::Rejected(reason) => {
                    tracing::info!(%identifier, %reason, "Rejected");
                }
                CandidateOutcome::Skipped(reason) => {
                    tracing::warn!(%identifier, %reason, "Skipped");
                }
                CandidateOutcome::RolledBack(media) => {
                    tracing::warn!(
                        %identifier,
                        attempted = media.attempted,
                        "No media downloaded, directory removed"
                    );
                }
            },
            HarvestEvent::Fatal { identifier, error } => {
                tracing::error!(%identifier, %error, "Record log write failed, stopping");
            }
            HarvestEvent::Warning { action, error } => {
                tracing::warn!(%action, %error, "Step failed, continuing");
            }
            HarvestEvent::SnapshotSaved { path } => {
                tracing::warn!(path = %path.display(), "Nothing accepted, saved feed snapshot");
            }
            HarvestEvent::Finished { summary } => {
                tracing::info!(
                    run_id = %summary.run_id,
                    accepted = summary.accepted,
                    target = summary.target,
                    evaluated = summary.evaluated,
                    rejected = summary.rejected,
                    skipped = summary.skipped,
                    rolled_back = summary.rolled_back,
                    stop_reason = ?summary.stop_reason,
                    "Harvest finished"
                );
            }
        }
    }
}

/// Drives a feed through the filter chain into the record store.
pub struct Harvester<D, M, C, S>
where
    D: FeedDriver,
    M: MediaFetcher,
    C: Classifier,
    S: RecordStore,
{
    driver: D,
    filter: FilterChain<M, C>,
    acquirer: MediaAcquirer<M>,
    store: S,
    artifacts: ArtifactStore,
    config: RunConfig,
    snapshot_path: Option<PathBuf>,
}

impl<D, M, C, S> Harvester<D, M, C, S>
where
    D: FeedDriver,
    M: MediaFetcher,
    C: Classifier,
    S: RecordStore,
{
    pub fn new(
        driver: D,
        fetcher: M,
        classifier: C,
        store: S,
        artifacts: ArtifactStore,
        config: RunConfig,
    ) -> Self {
        let acquirer = MediaAcquirer::new(fetcher.clone(), config.media_cap, config.fetch_timeout());
        let filter = FilterChain::new(fetcher, classifier, config.clone());
        Self {
            driver,
            filter,
            acquirer,
            store,
            artifacts,
            config,
            snapshot_path: None,
        }
    }

    /// Write the feed's markup here when a run accepts nothing.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the discovery loop until a stop condition holds.
    pub async fn run<R: HarvestReporter>(
        &mut self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> RunSummary {
        let mut summary = RunSummary::new(Uuid::new_v4(), self.config.target_count);

        reporter.report(HarvestEvent::Started {
            run_id: summary.run_id,
            target: summary.target,
            next_index: self.store.next_index(),
        });

        match self.artifacts.sweep_interrupted(self.store.next_index()) {
            Ok(Some(index)) => reporter.report(HarvestEvent::InterruptedSwept { index }),
            Ok(None) => {}
            Err(e) => reporter.report(HarvestEvent::Warning {
                action: "sweep interrupted directory",
                error: &e,
            }),
        }

        let mut seen = SeenSet::new();
        let mut empty_attempts: u32 = 0;

        let stop_reason = loop {
            if cancel_token.is_cancelled() {
                break StopReason::Cancelled;
            }
            if summary.accepted >= self.config.target_count {
                break StopReason::TargetReached;
            }
            if empty_attempts >= self.config.max_empty_attempts {
                break StopReason::FeedExhausted;
            }

            reporter.report(HarvestEvent::Phase(Phase::Searching));
            let candidate = match self.next_candidate(&seen, reporter).await {
                Some(candidate) => candidate,
                None => {
                    empty_attempts += 1;
                    summary.reveals += 1;
                    reporter.report(HarvestEvent::Phase(Phase::Scrolling));
                    reporter.report(HarvestEvent::Scrolling {
                        attempt: empty_attempts,
                        max_attempts: self.config.max_empty_attempts,
                    });
                    if let Err(e) = self.driver.reveal_more().await {
                        reporter.report(HarvestEvent::Warning {
                            action: "reveal more",
                            error: &e,
                        });
                    }
                    tokio::select! {
                        () = tokio::time::sleep(self.config.reveal_pause()) => {}
                        () = cancel_token.cancelled() => {}
                    }
                    continue;
                }
            };

            empty_attempts = 0;
            seen.mark_seen(&candidate.identifier);
            summary.evaluated += 1;
            reporter.report(HarvestEvent::CandidateFound {
                identifier: &candidate.identifier,
            });

            let result = self.handle(&candidate, reporter).await;
            self.restore_feed(reporter).await;

            match result {
                Ok(outcome) => {
                    match &outcome {
                        CandidateOutcome::Accepted { .. } => summary.accepted += 1,
                        CandidateOutcome::Rejected(_) => summary.rejected += 1,
                        CandidateOutcome::Skipped(_) => summary.skipped += 1,
                        CandidateOutcome::RolledBack(_) => summary.rolled_back += 1,
                    }
                    reporter.report(HarvestEvent::Handled {
                        identifier: &candidate.identifier,
                        outcome: &outcome,
                    });
                }
                Err(e) => {
                    reporter.report(HarvestEvent::Fatal {
                        identifier: &candidate.identifier,
                        error: &e,
                    });
                    break StopReason::Fatal(e.to_string());
                }
            }
        };
        summary.stop_reason = stop_reason;

        reporter.report(HarvestEvent::Phase(Phase::Done));

        if summary.accepted == 0 {
            summary.snapshot = self.save_snapshot(reporter).await;
        }

        summary.finished_at = Utc::now();
        reporter.report(HarvestEvent::Finished { summary: &summary });
        summary
    }

    /// First visible, eligible candidate not yet seen in this run.
    async fn next_candidate<R: HarvestReporter>(
        &self,
        seen: &SeenSet,
        reporter: &R,
    ) -> Option<CandidateItem> {
        let timeout = self.config.navigation_timeout();
        let candidates =
            match tokio::time::timeout(timeout, self.driver.current_candidates()).await {
                Ok(Ok(candidates)) => candidates,
                Ok(Err(e)) => {
                    reporter.report(HarvestEvent::Warning {
                        action: "list candidates",
                        error: &e,
                    });
                    return None;
                }
                Err(_) => {
                    reporter.report(HarvestEvent::Warning {
                        action: "list candidates",
                        error: &AppError::Timeout(timeout.as_secs()),
                    });
                    return None;
                }
            };

        candidates
            .into_iter()
            .find(|c| !c.ineligible && !seen.has_seen(&c.identifier))
    }

    /// Evaluate, acquire and persist one candidate.
    ///
    /// Only a failed commit is returned as an error; everything else is a
    /// [`CandidateOutcome`].
    async fn handle<R: HarvestReporter>(
        &mut self,
        candidate: &CandidateItem,
        reporter: &R,
    ) -> Result<CandidateOutcome, AppError> {
        reporter.report(HarvestEvent::Phase(Phase::Evaluating));
        let timeout = self.config.navigation_timeout();

        let view = match tokio::time::timeout(timeout, self.driver.open(candidate)).await {
            Ok(Ok(Lookup::Found(view))) => view,
            Ok(Ok(Lookup::NotFound)) => {
                return Ok(CandidateOutcome::Skipped(
                    "detail view did not appear".into(),
                ));
            }
            Ok(Err(e)) => return Ok(CandidateOutcome::Skipped(e.to_string())),
            Err(_) => {
                return Ok(CandidateOutcome::Skipped(
                    AppError::Timeout(timeout.as_secs()).to_string(),
                ));
            }
        };

        let fields = match tokio::time::timeout(timeout, self.driver.extract(&view)).await {
            Ok(Ok(fields)) => fields,
            Ok(Err(e)) => return Ok(CandidateOutcome::Skipped(e.to_string())),
            Err(_) => {
                return Ok(CandidateOutcome::Skipped(
                    AppError::Timeout(timeout.as_secs()).to_string(),
                ));
            }
        };

        if let Verdict::Reject(reason) = self.filter.evaluate(&fields).await {
            return Ok(CandidateOutcome::Rejected(reason));
        }

        reporter.report(HarvestEvent::Phase(Phase::Acquiring));
        let index = self.store.next_index();
        let dir = match self.artifacts.prepare(index) {
            Ok(dir) => dir,
            Err(e) => {
                return Ok(CandidateOutcome::Skipped(format!(
                    "could not create artifact directory: {e}"
                )));
            }
        };
        let media = self.acquirer.acquire(&fields.media_urls, &dir).await;

        if media.succeeded == 0 {
            reporter.report(HarvestEvent::Phase(Phase::RollingBack));
            self.roll_back(&dir, reporter);
            return Ok(CandidateOutcome::RolledBack(media));
        }

        reporter.report(HarvestEvent::Phase(Phase::Persisting));
        let record = AcquisitionRecord {
            sequence_index: index,
            title: fields
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNTITLED.to_string()),
            body: fields.body,
            source_identifier: candidate.identifier.clone(),
            media_count: media.succeeded,
        };

        if let Err(e) = self.store.commit(&record) {
            reporter.report(HarvestEvent::Phase(Phase::RollingBack));
            self.roll_back(&dir, reporter);
            return Err(match e {
                AppError::PersistenceError(_) => e,
                other => AppError::PersistenceError(other.to_string()),
            });
        }

        Ok(CandidateOutcome::Accepted { index, media })
    }

    fn roll_back<R: HarvestReporter>(&self, dir: &Path, reporter: &R) {
        if let Err(e) = self.artifacts.rollback(dir) {
            reporter.report(HarvestEvent::Warning {
                action: "roll back artifact directory",
                error: &e,
            });
        }
    }

    async fn restore_feed<R: HarvestReporter>(&self, reporter: &R) {
        let timeout = self.config.navigation_timeout();
        let error = match tokio::time::timeout(timeout, self.driver.return_to_feed()).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(_) => AppError::Timeout(timeout.as_secs()),
        };
        reporter.report(HarvestEvent::Warning {
            action: "return to feed",
            error: &error,
        });
    }

    async fn save_snapshot<R: HarvestReporter>(&self, reporter: &R) -> Option<PathBuf> {
        let path = self.snapshot_path.clone()?;
        let result = match self.driver.snapshot().await {
            Ok(html) => std::fs::write(&path, html).map_err(AppError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                reporter.report(HarvestEvent::SnapshotSaved { path: &path });
                Some(path)
            }
            Err(e) => {
                reporter.report(HarvestEvent::Warning {
                    action: "save snapshot",
                    error: &e,
                });
                None
            }
        }
    }
}
