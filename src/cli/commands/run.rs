//! The watch loop.

use console::style;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Settings;
use crate::scheduler::{Scheduler, SchedulerContext};

use super::super::helpers::launcher;

/// Run sessions until Ctrl-C.
pub async fn cmd_run(settings: &Settings, seed: Option<u64>) -> anyhow::Result<()> {
    let scheduler = Scheduler::from_settings(settings, launcher(settings)?)?;
    let mut ctx = match seed {
        Some(seed) => SchedulerContext::new(StdRng::seed_from_u64(seed)),
        None => SchedulerContext::from_entropy(),
    };

    println!(
        "{} Watching {} (downloads to {})",
        style("→").cyan(),
        style(settings.site.board_url()).bold(),
        settings.destination_dir.display()
    );
    if settings.credentials.is_none() {
        println!(
            "{} No credentials set; use BOARDWATCH_EMAIL and BOARDWATCH_PASSWORD to log in",
            style("!").yellow()
        );
    }

    tokio::select! {
        _ = scheduler.run_forever(&mut ctx) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("\n{} Interrupted", style("!").yellow());
        }
    }
    Ok(())
}
