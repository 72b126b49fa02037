//! One-off resolution for manual triage.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::http::HttpClient;
use crate::records::RecordLog;
use crate::resolver::{FetchPlan, HostRegistry, Outcome, Resolver};

use super::super::helpers::launcher;

/// Resolve `url` as if it were quoted at `thread`#`reply` and print the result.
pub async fn cmd_resolve(settings: &Settings, url: &str, thread: u64, reply: u32) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let http = HttpClient::new(&settings.user_agent, Duration::from_secs(settings.request_timeout))
        .map_err(anyhow::Error::msg)?;
    let registry = HostRegistry::from_config(
        &settings.hosts,
        Arc::clone(&settings.symbol_alphabet),
        settings.backup_dir.clone(),
        settings.destination_dir.clone(),
        Arc::clone(&settings.password_candidates),
    )
    .map_err(anyhow::Error::msg)?;
    let resolver = Resolver::new(http, registry, RecordLog::new(&settings.log_dir));

    let mut browser = launcher(settings)?.launch().await?;
    let outcome = resolver.resolve(browser.as_mut(), url, thread, reply).await;
    if let Err(e) = browser.close().await {
        tracing::debug!("Browser close failed: {}", e);
    }

    match outcome? {
        Outcome::Target(target) => {
            println!("{} {} ({})", style("✓").green(), target.local_filename, target.strategy_tag);
            match target.plan {
                FetchPlan::Direct { url } => println!("  fetch:   {}", url),
                FetchPlan::BrowserDownload { trigger } => {
                    println!("  click:   {}", trigger)
                }
            }
        }
        Outcome::Skip(reason) => println!("{} skip: {}", style("-").yellow(), reason),
        Outcome::Fatal(reason) => println!("{} fatal: {}", style("✗").red(), reason),
    }
    Ok(())
}
