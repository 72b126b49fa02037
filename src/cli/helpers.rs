//! Shared helper functions for CLI commands.

use std::sync::Arc;

use crate::browser::BrowserLauncher;
use crate::config::Settings;

/// Browser launcher for the configured backend.
#[cfg(feature = "browser")]
pub fn launcher(settings: &Settings) -> anyhow::Result<Arc<dyn BrowserLauncher>> {
    use std::time::Duration;

    use crate::browser::ChromiumLauncher;

    Ok(Arc::new(ChromiumLauncher {
        headless: settings.headless,
        download_dir: settings.scratch_dir.clone(),
        timeout: Duration::from_secs(settings.page_timeout_secs.max(settings.request_timeout)),
        user_agent: Some(settings.user_agent.clone()),
    }))
}

#[cfg(not(feature = "browser"))]
pub fn launcher(_settings: &Settings) -> anyhow::Result<Arc<dyn BrowserLauncher>> {
    anyhow::bail!("boardwatch was built without the `browser` feature")
}

/// Human readable age such as `3h 12m`.
pub fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        m if m < 60 => format!("{}m", m),
        m if m < 60 * 24 => format!("{}h {}m", m / 60, m % 60),
        m => format!("{}d {}h", m / (60 * 24), (m / 60) % 24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::seconds(20)), "just now");
        assert_eq!(format_age(chrono::Duration::minutes(5)), "5m");
        assert_eq!(format_age(chrono::Duration::minutes(192)), "3h 12m");
        assert_eq!(format_age(chrono::Duration::hours(50)), "2d 2h");
    }
}
