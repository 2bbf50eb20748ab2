//! imgcast - bulk image posting through a remote web editor
//!
//! This library discovers images, skips the ones already posted, groups the
//! rest into posts, and drives each post through the remote editor with a
//! bounded state machine. Confirmed posts are remembered in a local ledger.

pub mod attempt;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod logging;
pub mod retry;
pub mod session;
pub mod ui;
pub mod wait;

// Re-export commonly used types
pub use attempt::{AttemptOutcome, AttemptReport, Phase, PostAttempt, PostStateMachine};
pub use batch::{Batch, GroupPolicy, TitleSource};
pub use config::{Config, PauseRange, PostConfig, UntitledPublish};
pub use coordinator::{RunCoordinator, RunOptions, RunSummary};
pub use discovery::{discover, SourceFile};
pub use error::{ImgcastError, Result};
pub use hasher::ContentFingerprint;
pub use ledger::Ledger;
pub use session::{SessionState, SessionStore};
