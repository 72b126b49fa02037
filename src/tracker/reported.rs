/// Count recorded for a closed thread when nothing else is configured.
/// Threads on the board close at 300 replies.
pub const DEFAULT_FINISHED_SENTINEL: u32 = 300;

/// Reply count as shown on the thread index badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedCount {
    Count(u32),
    /// Non-numeric badge ("completed", "closed", ...).
    Finished,
}

impl ReportedCount {
    /// Parse badge text. Anything that is not a number means the thread is closed.
    pub fn parse(badge: &str) -> Self {
        let trimmed = badge.trim();
        match trimmed.replace(',', "").parse::<u32>() {
            Ok(n) => ReportedCount::Count(n),
            Err(_) => ReportedCount::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ReportedCount::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_badge() {
        assert_eq!(ReportedCount::parse("8"), ReportedCount::Count(8));
        assert_eq!(ReportedCount::parse(" 1,204 "), ReportedCount::Count(1204));
        assert_eq!(ReportedCount::parse("완결"), ReportedCount::Finished);
        assert_eq!(ReportedCount::parse("closed"), ReportedCount::Finished);
        assert!(ReportedCount::parse("").is_finished());
    }
}
