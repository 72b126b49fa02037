//! Tracker statistics.

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::tracker::ReplyTracker;

use super::super::helpers::format_age;

/// Print tracker statistics, or one thread's watermark.
pub fn cmd_status(settings: &Settings, thread: Option<u64>) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    if !db_path.exists() {
        println!(
            "{} No tracker database at {}",
            style("!").yellow(),
            db_path.display()
        );
        return Ok(());
    }
    let tracker = ReplyTracker::open(&db_path)?;
    let now = Utc::now();

    if let Some(thread_id) = thread {
        match tracker.get(thread_id)? {
            Some(mark) => {
                println!("\n{}", style(format!("Thread {}", thread_id)).bold());
                println!("  Replies scanned: {}", mark.reply_count);
                println!(
                    "  Finished:        {}",
                    if mark.finished { style("yes").yellow() } else { style("no").green() }
                );
                println!(
                    "  Last update:     {} ({} ago)",
                    mark.updated_at.format("%Y-%m-%d %H:%M"),
                    format_age(now - mark.updated_at)
                );
            }
            None => println!("{} Thread {} has not been seen", style("✗").red(), thread_id),
        }
        return Ok(());
    }

    let stats = tracker.stats()?;
    println!("\n{}", style("Reply Tracker").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Threads tracked", stats.threads);
    println!("{:<20} {}", "Finished threads", stats.finished);
    if let Some(oldest) = stats.oldest_update {
        println!("{:<20} {} ago", "Oldest update", format_age(now - oldest));
    }
    if let Some(newest) = stats.newest_update {
        println!("{:<20} {} ago", "Newest update", format_age(now - newest));
    }
    println!("{:<20} {} days", "Retention", settings.retention_days);
    Ok(())
}
