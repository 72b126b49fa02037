//! Session-level error taxonomy.
//!
//! Item-level problems never reach this type: the resolver turns them into
//! `Outcome::Skip` / `Outcome::Fatal` and the scanner logs per-reply parse
//! failures. Anything that does surface here ends the browser session and
//! sends the scheduler into a cooldown.

use thiserror::Error;

use crate::browser::BrowserError;
use crate::resolver::ResolveError;
use crate::tracker::TrackerError;

/// How long the scheduler should stay idle after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    /// Regular end of session, or a page that failed to load in time.
    Short,
    /// Login rejected; assume the account is throttled.
    Long,
    /// The browser process died.
    Longer,
}

/// Errors that abort a crawl session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login failed: {0}")]
    Login(String),

    #[error("page load timed out: {0}")]
    PageTimeout(String),

    #[error("browser failure: {0}")]
    Browser(BrowserError),

    #[error("reply tracker failure: {0}")]
    Tracker(#[from] TrackerError),

    #[error("filesystem failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Cooldown to apply before the next session.
    pub fn cooldown(&self) -> CooldownKind {
        match self {
            SessionError::Login(_) => CooldownKind::Long,
            SessionError::Browser(BrowserError::Crashed(_)) => CooldownKind::Longer,
            _ => CooldownKind::Short,
        }
    }
}

impl From<BrowserError> for SessionError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout { what, .. } => SessionError::PageTimeout(what),
            other => SessionError::Browser(other),
        }
    }
}

impl From<ResolveError> for SessionError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Browser(e) => e.into(),
            ResolveError::Io(e) => SessionError::Io(e),
        }
    }
}
