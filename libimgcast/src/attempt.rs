//! Post state machine
//!
//! Drives one batch through the remote post editor:
//!
//! ```text
//! Created → MetadataPending → FilesAttaching → AwaitingReadiness
//!         → PrePublishPause → Publishing → Confirming → Confirmed | Failed
//! ```
//!
//! Every suspension point is bounded by a value from [`PostConfig`], and the
//! page is closed on every exit path. The machine never touches the ledger;
//! it only reports what happened.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::batch::Batch;
use crate::config::{PostConfig, UntitledPublish};
use crate::error::UiError;
use crate::ui::{Browser, Page, UiContract};
use crate::wait::{poll_until, retry_within, within, Waited};

/// Where an attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    MetadataPending,
    FilesAttaching,
    AwaitingReadiness,
    PrePublishPause,
    Publishing,
    Confirming,
    Confirmed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::MetadataPending => "metadata",
            Phase::FilesAttaching => "attaching files",
            Phase::AwaitingReadiness => "awaiting readiness",
            Phase::PrePublishPause => "pre-publish pause",
            Phase::Publishing => "publishing",
            Phase::Confirming => "confirming",
            Phase::Confirmed => "confirmed",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// How sure we are that the uploads registered before publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Thumbnails rendered
    Thumbnails,
    /// No thumbnails in time; the page went network-idle instead
    NetworkIdle,
    /// Neither signal arrived; publishing anyway
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub page_opens: u32,
    pub navigation_attempts: u32,
    pub title_fill_attempts: u32,
    pub publish_clicks: u32,
}

/// One run of the state machine against one batch
///
/// Attempts live in memory only; nothing about them is persisted unless
/// the coordinator records a confirmed batch.
#[derive(Debug, Clone)]
pub struct PostAttempt {
    pub id: Uuid,
    /// Position of the batch in batching order
    pub index: usize,
    pub batch: Batch,
    pub title: String,
    pub tags: Vec<String>,
    phase: Phase,
    counters: AttemptCounters,
    title_set: bool,
    readiness: Option<Readiness>,
}

impl PostAttempt {
    pub fn new(index: usize, batch: Batch, title: String, tags: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            batch,
            title,
            tags,
            phase: Phase::Created,
            counters: AttemptCounters::default(),
            title_set: false,
            readiness: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{} → {}", self.phase, phase);
        self.phase = phase;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The page reached the created-post location
    Confirmed {
        location: String,
        post_id: Option<u64>,
    },
    /// Everything up to the publish click succeeded; nothing was published
    DryRun,
    Failed { phase: Phase, reason: String },
}

/// What an attempt did, handed back to the coordinator
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub id: Uuid,
    pub index: usize,
    pub batch: Batch,
    pub title: String,
    pub outcome: AttemptOutcome,
    pub counters: AttemptCounters,
    pub title_set: bool,
    pub readiness: Option<Readiness>,
    pub elapsed: Duration,
}

impl AttemptReport {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Confirmed { .. })
    }

    /// Confirmed or a successful dry run
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

/// Runs post attempts with fixed timings and selectors
#[derive(Clone)]
pub struct PostStateMachine {
    config: Arc<PostConfig>,
    contract: Arc<UiContract>,
}

impl PostStateMachine {
    pub fn new(config: Arc<PostConfig>, contract: Arc<UiContract>) -> Self {
        Self { config, contract }
    }

    pub fn config(&self) -> &PostConfig {
        &self.config
    }

    /// Drive `attempt` to a terminal state on a fresh page from `browser`
    pub async fn run(&self, browser: &dyn Browser, attempt: PostAttempt) -> AttemptReport {
        let span = info_span!(
            "attempt",
            id = %attempt.id,
            batch = attempt.index,
            title = %attempt.title,
            files = attempt.batch.len()
        );
        self.run_inner(browser, attempt).instrument(span).await
    }

    async fn run_inner(&self, browser: &dyn Browser, mut attempt: PostAttempt) -> AttemptReport {
        let started = Instant::now();
        info!(
            "Posting {} files as \"{}\"",
            attempt.batch.len(),
            attempt.title
        );

        let opened = self
            .open_page(browser, &mut attempt.counters.page_opens)
            .await;
        let outcome = match opened {
            Ok(page) => {
                let result = self.drive(page.as_ref(), &mut attempt).await;
                if let Err(e) = page.close().await {
                    warn!("Failed to close page: {}", e);
                }
                match result {
                    Ok(outcome) => outcome,
                    Err(e) => AttemptOutcome::Failed {
                        phase: attempt.phase,
                        reason: e.to_string(),
                    },
                }
            }
            Err(e) => AttemptOutcome::Failed {
                phase: Phase::Created,
                reason: e.to_string(),
            },
        };

        match &outcome {
            AttemptOutcome::Confirmed { location, .. } => {
                attempt.enter(Phase::Confirmed);
                info!("Post confirmed at {}", location);
            }
            AttemptOutcome::DryRun => {
                info!("Dry run: stopped before publishing");
            }
            AttemptOutcome::Failed { phase, reason } => {
                attempt.enter(Phase::Failed);
                warn!("Post failed during {}: {}", phase, reason);
            }
        }

        let elapsed = started.elapsed();
        debug!("Attempt finished in {:.1}s", elapsed.as_secs_f64());

        AttemptReport {
            id: attempt.id,
            index: attempt.index,
            batch: attempt.batch,
            title: attempt.title,
            outcome,
            counters: attempt.counters,
            title_set: attempt.title_set,
            readiness: attempt.readiness,
            elapsed,
        }
    }

    async fn drive(
        &self,
        page: &dyn Page,
        attempt: &mut PostAttempt,
    ) -> Result<AttemptOutcome, UiError> {
        self.open_editor(page, &mut attempt.counters.navigation_attempts)
            .await?;
        attempt.enter(Phase::MetadataPending);

        let (title_set, fills) = self.fill_title(page, &attempt.title).await;
        attempt.title_set = title_set;
        attempt.counters.title_fill_attempts += fills;
        self.enter_tags(page, &attempt.tags).await;

        attempt.enter(Phase::FilesAttaching);
        self.attach_files(page, &attempt.batch).await?;

        attempt.enter(Phase::AwaitingReadiness);
        attempt.readiness = Some(self.await_readiness(page).await);

        if !attempt.title_set {
            let (title_set, fills) = self.fill_title(page, &attempt.title).await;
            attempt.title_set = title_set;
            attempt.counters.title_fill_attempts += fills;

            if !title_set {
                match self.config.untitled {
                    UntitledPublish::Allow => {
                        warn!("Title could not be set; publishing with the remote default")
                    }
                    UntitledPublish::Refuse => {
                        return Err(UiError::Interaction(
                            "title could not be set and untitled posts are refused".to_string(),
                        ));
                    }
                }
            }
        }

        attempt.enter(Phase::PrePublishPause);
        let pause = self.config.pause.sample();
        debug!("Pausing {:.1}s before publishing", pause.as_secs_f64());
        sleep(pause).await;

        if self.config.dry_run {
            return Ok(AttemptOutcome::DryRun);
        }

        attempt.enter(Phase::Publishing);
        let clicks = AtomicU32::new(0);
        let result = self.publish_and_confirm(page, &clicks).await;
        attempt.counters.publish_clicks = clicks.load(Ordering::SeqCst);

        match result {
            Ok(location) => {
                let post_id = self.contract.confirmation.post_id(&location);
                Ok(AttemptOutcome::Confirmed { location, post_id })
            }
            Err(e) => {
                if matches!(e, UiError::Timeout { .. }) {
                    attempt.enter(Phase::Confirming);
                }
                Err(e)
            }
        }
    }

    /// Open a page, bounded and retried like navigation
    async fn open_page(
        &self,
        browser: &dyn Browser,
        tries: &mut u32,
    ) -> Result<Box<dyn Page>, UiError> {
        let limit = self.config.navigation_timeout;

        self.config
            .navigation_retry
            .run("open browser page", |n| {
                *tries = n;
                async move {
                    within(limit, browser.open_page())
                        .await
                        .or_timeout("browser page to open", limit)?
                }
            })
            .await
    }

    /// Navigate to the editor, counting tries into `tries`
    async fn open_editor(&self, page: &dyn Page, tries: &mut u32) -> Result<(), UiError> {
        let url = self.contract.editor_url.as_str();
        let limit = self.config.navigation_timeout;

        self.config
            .navigation_retry
            .run("open post editor", |n| {
                *tries = n;
                async move {
                    within(limit, page.goto(url))
                        .await
                        .or_timeout("post editor to load", limit)?
                }
            })
            .await
    }

    /// Try to set the title within the field timeout
    ///
    /// Returns whether it worked and how many fills were tried.
    async fn fill_title(&self, page: &dyn Page, title: &str) -> (bool, u32) {
        let input = &self.contract.title_input;
        let tries = AtomicU32::new(0);
        let tries_ref = &tries;

        let result = retry_within(
            self.config.field_timeout,
            self.config.poll_interval,
            "title field",
            || {
                tries_ref.fetch_add(1, Ordering::SeqCst);
                page.fill(input, title)
            },
        )
        .await;

        let tries = tries.load(Ordering::SeqCst);
        match result {
            Ok(()) => {
                debug!("Title set after {} tries", tries);
                (true, tries)
            }
            Err(e) => {
                warn!("Could not set title: {}", e);
                (false, tries)
            }
        }
    }

    /// Enter each tag and commit it with Enter; failures are only logged
    async fn enter_tags(&self, page: &dyn Page, tags: &[String]) {
        let input = &self.contract.tags_input;
        let limit = self.config.field_timeout;
        for tag in tags {
            let entered = within(limit, async {
                page.fill(input, tag).await?;
                page.press_enter(input).await
            })
            .await
            .or_timeout("tag field", limit)
            .and_then(|r| r);

            match entered {
                Ok(()) => debug!("Entered tag {}", tag),
                Err(e) => warn!("Could not enter tag {}: {}", tag, e),
            }
            sleep(self.config.tag_settle).await;
        }
    }

    /// Hand the whole batch to the first file control that accepts it
    async fn attach_files(&self, page: &dyn Page, batch: &Batch) -> Result<(), UiError> {
        let input = &self.contract.file_input;
        let appeared = within(
            self.config.control_timeout,
            poll_until(self.config.poll_interval, || async {
                Ok::<_, UiError>(page.count(input).await? > 0)
            }),
        )
        .await;

        let controls = match appeared {
            Waited::Done(()) => page.count(input).await?,
            Waited::TimedOut => 0,
        };
        if controls == 0 {
            return Err(UiError::ElementNotFound(format!(
                "file attachment control ({})",
                input
            )));
        }

        let paths = batch.paths();
        let limit = self.config.upload_timeout;
        for index in 0..controls {
            let accepted = within(limit, page.set_files(input, index, &paths))
                .await
                .or_timeout("file control to accept the files", limit)
                .and_then(|r| r);

            match accepted {
                Ok(()) => {
                    info!("Attached {} files via control #{}", paths.len(), index);
                    return Ok(());
                }
                Err(e) => debug!("File control #{} rejected the files: {}", index, e),
            }
        }

        Err(UiError::Interaction(format!(
            "none of {} file controls accepted the files",
            controls
        )))
    }

    /// Wait for thumbnails, falling back to network idle
    async fn await_readiness(&self, page: &dyn Page) -> Readiness {
        let thumbnail = &self.contract.thumbnail;
        let rendered = within(
            self.config.thumbnail_timeout,
            poll_until(self.config.poll_interval, || async {
                Ok::<_, UiError>(page.count(thumbnail).await? > 0)
            }),
        )
        .await;

        if rendered.is_done() {
            debug!("Thumbnails rendered");
            return Readiness::Thumbnails;
        }

        warn!(
            "No thumbnails after {:.0}s; falling back to network idle",
            self.config.thumbnail_timeout.as_secs_f64()
        );
        if self.settle(page).await {
            Readiness::NetworkIdle
        } else {
            Readiness::Unconfirmed
        }
    }

    /// Wait for network idle, then sleep the settle delay
    async fn settle(&self, page: &dyn Page) -> bool {
        let idle = within(
            self.config.idle_timeout,
            poll_until(self.config.poll_interval, || page.is_network_idle()),
        )
        .await
        .is_done();

        if !idle {
            debug!("Page never went network-idle");
        }
        sleep(self.config.settle_delay).await;
        idle
    }

    /// Click publish and wait for the created-post location
    ///
    /// A miss triggers the idle fallback and one more full cycle. Click
    /// failures end the attempt at once.
    async fn publish_and_confirm(
        &self,
        page: &dyn Page,
        clicks: &AtomicU32,
    ) -> Result<String, UiError> {
        self.config
            .confirm_retry
            .run("publish confirmation", |cycle| async move {
                if cycle > 1 {
                    self.settle(page).await;
                }
                self.click_publish(page).await?;
                clicks.fetch_add(1, Ordering::SeqCst);
                self.wait_for_post(page).await
            })
            .await
    }

    async fn click_publish(&self, page: &dyn Page) -> Result<(), UiError> {
        let button = &self.contract.publish_button;
        let limit = self.config.click_timeout;

        // Timeouts are not transient here: an unclickable button ends the attempt
        retry_within(limit, self.config.poll_interval, "publish button", || {
            page.click(button)
        })
        .await
        .map_err(|e| UiError::Interaction(format!("publish control not clickable: {}", e)))?;

        debug!("Clicked publish");
        Ok(())
    }

    async fn wait_for_post(&self, page: &dyn Page) -> Result<String, UiError> {
        let confirmation = &self.contract.confirmation;
        let limit = self.config.publish_timeout;

        within(
            limit,
            poll_until(self.config.poll_interval, || async {
                Ok::<_, UiError>(confirmation.matches(&page.current_url().await?))
            }),
        )
        .await
        .or_timeout("created-post location", limit)?;

        page.current_url().await
    }
}
