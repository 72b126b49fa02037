//! Parsing of the board's thread index and thread pages.
//!
//! All functions here are synchronous and take the page HTML as a string;
//! `scraper::Html` never lives across an await point.

mod index;
mod selectors;
mod thread;

pub use index::{parse_index, IndexEntry};
pub use selectors::{compile, CompiledSelectors, Selectors};
pub use thread::{parse_thread, Fragment, ReplyParseError, ReplyRecord, ThreadPage};
