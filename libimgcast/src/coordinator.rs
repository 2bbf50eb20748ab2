//! Run coordination
//!
//! Turns discovered files into attempts and drives them through the post
//! state machine. The coordinator owns the ledger: every write happens in
//! its single consumer loop, whatever the concurrency factor.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::attempt::{AttemptOutcome, AttemptReport, PostAttempt, PostStateMachine};
use crate::batch::{batch, GroupPolicy, TitleSource};
use crate::discovery::SourceFile;
use crate::error::{ImgcastError, Result};
use crate::hasher::{fingerprint, ContentFingerprint};
use crate::ledger::Ledger;
use crate::ui::Browser;

/// Run-level choices, usually merged from config and CLI flags
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub post_size: usize,
    pub group_by: GroupPolicy,
    pub title_from: TitleSource,
    pub auto_title_prefix: String,
    pub tags: Vec<String>,
    pub concurrency: usize,
    /// Offer every discovered file, ignoring the ledger
    pub skip_dedupe: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            post_size: 20,
            group_by: GroupPolicy::Folder,
            title_from: TitleSource::Folder,
            auto_title_prefix: "Upload".to_string(),
            tags: Vec::new(),
            concurrency: 1,
            skip_dedupe: false,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    /// Files left after the dedupe filter
    pub eligible: usize,
    /// Files skipped because they could not be read
    pub unreadable: usize,
    pub batches: usize,
    pub attempted: usize,
    pub confirmed: usize,
    pub dry_run: usize,
    pub failed: usize,
    /// Batches never offered because shutdown was requested
    pub not_started: usize,
    /// Fingerprints newly written to the ledger
    pub recorded: usize,
}

impl RunSummary {
    /// Batches that reached a success state (confirmed or dry run)
    pub fn succeeded(&self) -> usize {
        self.confirmed + self.dry_run
    }
}

pub struct RunCoordinator {
    ledger: Ledger,
    machine: PostStateMachine,
    options: RunOptions,
    shutdown: Arc<AtomicBool>,
}

impl RunCoordinator {
    pub fn new(ledger: Ledger, machine: PostStateMachine, options: RunOptions) -> Self {
        Self {
            ledger,
            machine,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that, once set, stops new batches from being offered
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Drop files whose fingerprint is already in the ledger
    ///
    /// Returns the eligible files (fingerprinted) and the number of files
    /// that could not be read. With `skip_dedupe` every file is eligible and
    /// nothing is hashed up front.
    pub async fn eligible(&self, files: Vec<SourceFile>) -> Result<(Vec<SourceFile>, usize)> {
        if self.options.skip_dedupe {
            debug!("Dedupe skipped; all {} files are eligible", files.len());
            return Ok((files, 0));
        }

        let mut eligible = Vec::with_capacity(files.len());
        let mut unreadable = 0;

        for file in files {
            let fp = match hash_file(&file.path).await {
                Ok(fp) => fp,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", file.path.display(), e);
                    unreadable += 1;
                    continue;
                }
            };

            if self.ledger.contains(&fp).await? {
                debug!("Already posted: {}", file.path.display());
                continue;
            }
            eligible.push(file.with_fingerprint(fp));
        }

        Ok((eligible, unreadable))
    }

    /// Group eligible files into attempts, in batching order
    pub fn plan(&self, files: Vec<SourceFile>) -> Result<Vec<PostAttempt>> {
        let batches = batch(files, self.options.group_by, self.options.post_size)?;
        Ok(batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| {
                let title = batch.title(self.options.title_from, &self.options.auto_title_prefix);
                PostAttempt::new(index, batch, title, self.options.tags.clone())
            })
            .collect())
    }

    /// Dedupe, batch, and post `files`
    pub async fn run(&self, browser: &dyn Browser, files: Vec<SourceFile>) -> Result<RunSummary> {
        if self.options.concurrency == 0 {
            return Err(ImgcastError::InvalidInput(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        let mut summary = RunSummary {
            discovered: files.len(),
            ..Default::default()
        };

        let (eligible, unreadable) = self.eligible(files).await?;
        summary.eligible = eligible.len();
        summary.unreadable = unreadable;
        info!(
            "{} of {} files are eligible",
            summary.eligible, summary.discovered
        );

        let attempts = self.plan(eligible)?;
        summary.batches = attempts.len();
        if attempts.is_empty() {
            return Ok(summary);
        }

        let total = attempts.len();
        let concurrency = self.options.concurrency;
        let shutdown = &self.shutdown;
        let machine = &self.machine;

        let mut reports = stream::iter(attempts)
            .take_while(|_| futures::future::ready(!shutdown.load(Ordering::SeqCst)))
            .map(|attempt| async move {
                // Every slot after the first wave waits out the pacing pause
                if attempt.index >= concurrency {
                    let pause = machine.config().pause.sample();
                    debug!("Pacing {:.1}s before batch {}", pause.as_secs_f64(), attempt.index + 1);
                    sleep(pause).await;
                    if shutdown.load(Ordering::SeqCst) {
                        return None;
                    }
                }
                info!("Batch {}/{}", attempt.index + 1, total);
                Some(machine.run(browser, attempt).await)
            })
            .buffer_unordered(concurrency);

        while let Some(report) = reports.next().await {
            let Some(report) = report else {
                continue;
            };
            summary.attempted += 1;

            match &report.outcome {
                AttemptOutcome::Confirmed { .. } => {
                    summary.confirmed += 1;
                    summary.recorded += self.record(&report).await?;
                }
                AttemptOutcome::DryRun => summary.dry_run += 1,
                AttemptOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        summary.not_started = summary.batches - summary.attempted;
        if summary.not_started > 0 {
            warn!(
                "Shutdown requested; {} batches were not started",
                summary.not_started
            );
        }

        Ok(summary)
    }

    /// Write every file of a confirmed batch to the ledger
    async fn record(&self, report: &AttemptReport) -> Result<usize> {
        let mut recorded = 0;
        for file in report.batch.files() {
            let fp = match &file.fingerprint {
                Some(fp) => fp.clone(),
                None => match hash_file(&file.path).await {
                    Ok(fp) => fp,
                    Err(e) => {
                        warn!(
                            "Posted {} but could not fingerprint it: {}",
                            file.path.display(),
                            e
                        );
                        continue;
                    }
                },
            };

            if self.ledger.record(&fp, &file.path).await? {
                recorded += 1;
            }
        }

        debug!(
            "Recorded {} fingerprints for batch {}",
            recorded,
            report.index + 1
        );
        Ok(recorded)
    }
}

/// Hash a file off the async runtime
async fn hash_file(path: &Path) -> std::io::Result<ContentFingerprint> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .map_err(std::io::Error::other)?
}
