//! imgcast-upload - Post a directory of images as batched posts

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libimgcast::batch::parse_tags;
use libimgcast::config::Config;
use libimgcast::coordinator::{RunCoordinator, RunOptions, RunSummary};
use libimgcast::error::ImgcastError;
use libimgcast::logging::{self, LogFormat, LoggingConfig};
use libimgcast::ui::webdriver::WebDriverBrowser;
use libimgcast::ui::{Browser, UiContract};
use libimgcast::{
    discover, GroupPolicy, Ledger, PauseRange, PostStateMachine, Result, SessionStore,
    TitleSource, UntitledPublish,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "imgcast-upload")]
#[command(version)]
#[command(about = "Post a directory of images as batched posts")]
#[command(long_about = "\
imgcast-upload - Post a directory of images as batched posts

DESCRIPTION:
    imgcast-upload walks a directory for PNG, JPEG and WebP images, skips
    every file whose content was already posted, groups the rest into posts
    and publishes them through the remote post editor using the session
    saved by imgcast-login.

    A post only counts once the browser lands on the created post. Only
    then are its files remembered, so failed posts are retried on the next
    run.

USAGE:
    # Post everything new under a directory, one post per folder
    imgcast-upload ~/Pictures/renders

    # Ten images per post, titled after the first file, with tags
    imgcast-upload ~/Pictures/renders --post-size 10 --title-from file --tags \"sdxl, landscape\"

    # Walk through the whole flow without publishing
    imgcast-upload ~/Pictures/renders --dry-run --verbose

REQUIREMENTS:
    A WebDriver server (e.g. chromedriver --port=4444) must be running, and
    imgcast-login must have saved a session.

SIGNALS:
    SIGTERM, SIGINT - Stop offering new posts; posts in flight finish

CONFIGURATION:
    Configuration file: ~/.config/imgcast/config.toml (or $IMGCAST_CONFIG)
    Ledger location: ~/.local/share/imgcast/uploads.db
    Session location: ~/.local/share/imgcast/session.json

EXIT CODES:
    0 - Every attempted post succeeded (or nothing to do)
    1 - At least one post failed, or a runtime error
    2 - Invalid input (missing directory, missing session)
")]
struct Cli {
    /// Directory to scan for images
    #[arg(value_name = "DIR")]
    dir: String,

    /// Maximum images per post
    #[arg(long, value_name = "N")]
    post_size: Option<usize>,

    /// How to group images into posts
    #[arg(long, value_name = "MODE")]
    #[arg(help = "How to group images into posts: folder, flat")]
    group_by: Option<GroupPolicy>,

    /// Where post titles come from
    #[arg(long, value_name = "SOURCE")]
    #[arg(help = "Where post titles come from: folder, file, auto")]
    title_from: Option<TitleSource>,

    /// Comma-separated tags added to every post
    #[arg(long, value_name = "TAGS")]
    tags: Option<String>,

    /// Number of posts in flight at once
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Seconds to wait for the created post after clicking publish
    #[arg(long, value_name = "SECONDS")]
    publish_timeout: Option<u64>,

    /// Seconds to wait for upload thumbnails
    #[arg(long, value_name = "SECONDS")]
    thumb_timeout: Option<u64>,

    /// Random pause range in seconds, e.g. 4-8
    #[arg(long, value_name = "MIN-MAX")]
    pause: Option<PauseRange>,

    /// What to do when the title cannot be set
    #[arg(long, value_name = "POLICY")]
    #[arg(help = "What to do when the title cannot be set: allow, refuse")]
    untitled: Option<UntitledPublish>,

    /// Do everything except clicking publish
    #[arg(long)]
    dry_run: bool,

    /// Do not skip images that were already posted
    #[arg(long)]
    skip_dedupe: bool,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Start the browser window minimized
    #[arg(long)]
    minimized: bool,

    /// WebDriver server URL (overrides config)
    #[arg(long, value_name = "URL")]
    webdriver_url: Option<String>,

    /// Log format
    #[arg(long, value_name = "FORMAT", env = "IMGCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Trace every browser step
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(cli.log_format, logging::level_from_env(), cli.verbose)
        .with_debug(cli.debug)
        .with_log_file(cli.log_file.clone());
    if let Err(e) = logging.init() {
        eprintln!("Error: cannot open log file: {}", e);
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(summary) if summary.failed > 0 => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let mut config = Config::load()?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    // Fail fast, before any hashing or browser work
    let root = PathBuf::from(shellexpand::tilde(&cli.dir).to_string());
    let files = discover(&root)?;
    info!("Found {} images under {}", files.len(), root.display());

    let store = SessionStore::new(&config.session.path);
    let session = store.load()?;

    let ledger = Ledger::open(&config.ledger.path).await?;

    let contract = UiContract::from_config(&config.remote);
    let origin = contract.editor_origin().ok_or_else(|| {
        ImgcastError::InvalidInput(format!("Invalid editor URL: {}", contract.editor_url))
    })?;
    let browser = WebDriverBrowser::new(config.webdriver.clone(), origin, Some(session));

    let machine = PostStateMachine::new(
        Arc::new(config.post_config(cli.dry_run)),
        Arc::new(contract),
    );

    let options = RunOptions {
        post_size: config.upload.post_size,
        group_by: config.upload.group_by,
        title_from: config.upload.title_from,
        auto_title_prefix: config.upload.auto_title_prefix.clone(),
        tags: config.upload.tags.clone(),
        concurrency: config.upload.concurrency,
        skip_dedupe: cli.skip_dedupe,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let coordinator = RunCoordinator::new(ledger.clone(), machine, options).with_shutdown(shutdown);
    let summary = coordinator.run(&browser, files).await?;

    if let Some(refreshed) = browser.refreshed_session().await {
        if let Err(e) = store.save(&refreshed) {
            warn!("Could not refresh saved session: {}", e);
        }
    }
    ledger.close().await;

    report(&summary, cli.dry_run);
    Ok(summary)
}

/// CLI flags win over the config file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    let upload = &mut config.upload;
    if let Some(post_size) = cli.post_size {
        upload.post_size = post_size;
    }
    if let Some(group_by) = cli.group_by {
        upload.group_by = group_by;
    }
    if let Some(title_from) = cli.title_from {
        upload.title_from = title_from;
    }
    if let Some(tags) = &cli.tags {
        upload.tags = parse_tags(tags);
    }
    if let Some(concurrency) = cli.concurrency {
        upload.concurrency = concurrency;
    }
    if let Some(secs) = cli.publish_timeout {
        upload.publish_timeout_secs = secs;
    }
    if let Some(secs) = cli.thumb_timeout {
        upload.thumbnail_timeout_secs = secs;
    }
    if let Some(pause) = cli.pause {
        upload.pause = pause;
    }
    if let Some(untitled) = cli.untitled {
        upload.untitled_publish = untitled;
    }

    let webdriver = &mut config.webdriver;
    webdriver.headless |= cli.headless;
    webdriver.minimized |= cli.minimized;
    if let Some(url) = &cli.webdriver_url {
        webdriver.url = url.clone();
    }
}

fn report(summary: &RunSummary, dry_run: bool) {
    if summary.batches == 0 {
        println!("No new images to upload. Either none found or all are already recorded.");
        return;
    }

    if summary.unreadable > 0 {
        println!("Skipped {} unreadable files.", summary.unreadable);
    }
    if dry_run {
        println!(
            "Dry run complete. Posts prepared: {}/{}",
            summary.dry_run, summary.batches
        );
    } else {
        println!(
            "Done. Posts created: {}/{}",
            summary.confirmed, summary.batches
        );
    }
    if summary.not_started > 0 {
        println!("Interrupted: {} posts were not started.", summary.not_started);
    }
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ImgcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(
                "Received signal {}, finishing posts in flight before stopping...",
                sig
            );
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_config() {
        let cli = Cli::parse_from([
            "imgcast-upload",
            "/tmp/images",
            "--post-size",
            "5",
            "--group-by",
            "flat",
            "--tags",
            "a, b,,c",
            "--pause",
            "1-2",
            "--untitled",
            "refuse",
            "--headless",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.upload.post_size, 5);
        assert_eq!(config.upload.group_by, GroupPolicy::Flat);
        assert_eq!(config.upload.tags, vec!["a", "b", "c"]);
        assert_eq!(config.upload.pause, PauseRange::new(1.0, 2.0).unwrap());
        assert_eq!(config.upload.untitled_publish, UntitledPublish::Refuse);
        assert!(config.webdriver.headless);

        // Untouched values keep the config's
        assert_eq!(config.upload.title_from, TitleSource::Folder);
        assert_eq!(config.upload.concurrency, 1);
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let result = Cli::try_parse_from(["imgcast-upload", "/tmp", "--group-by", "random"]);
        assert!(result.is_err());
    }
}
