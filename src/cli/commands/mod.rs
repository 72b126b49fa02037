//! CLI command implementations.

pub mod gc;
pub mod resolve;
pub mod run;
pub mod status;
