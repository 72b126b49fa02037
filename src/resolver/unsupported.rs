use async_trait::async_trait;

use super::{HostStrategy, Outcome, ResolveEnv, ResolveError, ResolveRequest};

/// Known hosts we cannot download from. Links are logged and skipped.
pub struct UnsupportedHost {
    domain: String,
}

impl UnsupportedHost {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }
}

#[async_trait]
impl HostStrategy for UnsupportedHost {
    fn tag(&self) -> &'static str {
        "unsupported"
    }

    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        _env: &mut ResolveEnv<'_>,
    ) -> Result<Outcome, ResolveError> {
        Ok(Outcome::Skip(format!(
            "unusual upload on {} quoted at #{}",
            self.domain, request.reply
        )))
    }
}
