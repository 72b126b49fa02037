//! boardwatch - forum board watcher and attachment archiver.
//!
//! The agent polls a board's thread index, works out which replies are new
//! since the last visit, and downloads the files those replies link to. The
//! pause between index visits is adapted to how busy the board is so the
//! crawl looks like a person refreshing a page rather than a bot.

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod forum;
pub mod http;
pub mod pacing;
pub mod records;
pub mod resolver;
pub mod scanner;
pub mod scheduler;
pub mod tracker;

pub use config::{Config, Settings};
pub use error::{CooldownKind, SessionError};
pub use resolver::{DownloadTarget, FetchPlan, Outcome, Resolver};
pub use tracker::{Diff, ReplyTracker};
