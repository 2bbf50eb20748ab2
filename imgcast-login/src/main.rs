//! imgcast-login - Save a logged-in browser session for imgcast-upload

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use libimgcast::config::Config;
use libimgcast::logging::{self, LogFormat, LoggingConfig};
use libimgcast::ui::webdriver::{WebDriverBrowser, WebDriverPage};
use libimgcast::ui::{Browser, Page, UiContract};
use libimgcast::wait::{first_of, Source};
use libimgcast::SessionStore;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "imgcast-login")]
#[command(version)]
#[command(about = "Log in through a browser window and save the session")]
#[command(long_about = "\
imgcast-login - Log in through a browser window and save the session

DESCRIPTION:
    Opens a visible browser on the post editor. Log in there as you
    normally would, then press Enter in this terminal or simply close the
    browser window. The session cookies are saved for imgcast-upload.

    The login window gives up after the timeout (10 minutes by default)
    and saves whatever session it has seen by then.

REQUIREMENTS:
    A WebDriver server (e.g. chromedriver --port=4444) must be running.

CONFIGURATION:
    Configuration file: ~/.config/imgcast/config.toml (or $IMGCAST_CONFIG)
    Session location: ~/.local/share/imgcast/session.json

EXIT CODES:
    0 - Session saved
    1 - Error (browser unavailable, nothing to save)
")]
struct Cli {
    /// Seconds to wait for the login before giving up
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    timeout: u64,

    /// WebDriver server URL (overrides config)
    #[arg(long, value_name = "URL")]
    webdriver_url: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<std::path::PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Whichever happened first while the user was logging in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Enter,
    WindowClosed,
    TimedOut,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(LogFormat::Text, logging::level_from_env(), cli.verbose)
        .with_log_file(cli.log_file.clone());
    if let Err(e) = logging.init() {
        eprintln!("Error: cannot open log file: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.webdriver_url {
        config.webdriver.url = url;
    }
    // The user has to see the window to log in
    config.webdriver.headless = false;
    config.webdriver.minimized = false;

    let contract = UiContract::from_config(&config.remote);
    let origin = contract
        .editor_origin()
        .ok_or_else(|| anyhow!("Invalid editor URL: {}", contract.editor_url))?;

    let browser = WebDriverBrowser::new(config.webdriver.clone(), origin, None);
    let page = browser
        .open()
        .await
        .context("Is a WebDriver server (e.g. chromedriver --port=4444) running?")?;
    page.goto(&contract.editor_url)
        .await
        .context("Failed to open the login page")?;

    println!("Log in in the browser window, then press Enter here (or close the window).");

    let finished = wait_for_login(&page, Duration::from_secs(cli.timeout)).await;
    info!("Login finished: {:?}", finished);

    if finished != Finished::WindowClosed {
        if let Err(e) = page.snapshot_cookies().await {
            warn!("Could not read cookies: {}", e);
        }
    }
    // Closing also snapshots, which only fails once the window is gone
    if let Err(e) = Box::new(page).close().await {
        debug!("Browser already gone: {}", e);
    }

    let session = browser
        .refreshed_session()
        .await
        .ok_or_else(|| anyhow!("No session cookies were captured; nothing saved"))?;

    let store = SessionStore::new(&config.session.path);
    store.save(&session).context("Failed to save session")?;
    println!("Session saved to {}", store.path().display());

    Ok(())
}

/// Race Enter on stdin, the window closing, and the timeout
///
/// Cookies are snapshotted while waiting so a closed window still leaves a
/// session behind.
async fn wait_for_login(page: &WebDriverPage, timeout: Duration) -> Finished {
    let window_closed: Source<'_, ()> = Box::pin(async move {
        loop {
            if let Err(e) = page.snapshot_cookies().await {
                debug!("Cookie snapshot failed: {}", e);
            }
            if !page.is_window_open().await {
                return;
            }
            sleep(Duration::from_secs(1)).await;
        }
    });

    race_login(line_entered(std::io::stdin()), window_closed, timeout).await
}

/// Fires once a line arrives on `input`
///
/// The blocking read runs on its own thread, which the runtime never joins,
/// so losing the race never holds up shutdown. End of input never fires.
fn line_entered<R>(input: R) -> oneshot::Receiver<()>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        match BufReader::new(input).read_line(&mut line) {
            Ok(n) if n > 0 => {
                let _ = tx.send(());
            }
            Ok(_) => debug!("stdin closed; waiting for the window or the timeout"),
            Err(e) => debug!("Cannot read stdin: {}", e),
        }
    });
    rx
}

async fn race_login<'a>(
    enter: oneshot::Receiver<()>,
    window_closed: Source<'a, ()>,
    timeout: Duration,
) -> Finished {
    let sources: Vec<Source<'a, Finished>> = vec![
        Box::pin(async move {
            match enter.await {
                Ok(()) => Finished::Enter,
                Err(_) => std::future::pending().await,
            }
        }),
        Box::pin(async move {
            window_closed.await;
            Finished::WindowClosed
        }),
        Box::pin(async move {
            sleep(timeout).await;
            Finished::TimedOut
        }),
    ];

    first_of(sources).await.0
}
