use console::style;

use crate::config::Settings;
use crate::tracker::ReplyTracker;

/// Delete watermarks older than the retention window.
pub fn cmd_gc(settings: &Settings) -> anyhow::Result<()> {
    let tracker = ReplyTracker::open(&settings.database_path())?;
    let removed = tracker.delete_expired(settings.retention())?;
    println!(
        "{} Removed {} watermarks older than {} days",
        style("✓").green(),
        removed,
        settings.retention_days
    );
    Ok(())
}
