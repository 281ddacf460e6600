use super::{RefreshRequest, Worker};
use crate::provider::SessionProvider;

/// Counts ticks down to the next periodic manager refresh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Supervisor {
    period: u32,
    remaining: u32,
}

impl Supervisor {
    #[must_use]
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Self {
            period,
            remaining: period,
        }
    }

    /// Returns true once every `period` ticks
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.period;
            true
        } else {
            false
        }
    }
}

impl<P: SessionProvider> Worker<P> {
    /// Re-acquire the provider handle and reconcile against it.
    ///
    /// Provider handles can go stale without telling anyone, so this runs regardless of
    /// whether any event arrived.
    #[tracing::instrument(skip_all)]
    pub async fn supervise(&mut self) {
        tracing::debug!("Refreshing media session manager");
        match self.provider.request_manager().await {
            Ok(manager) => {
                self.attach_manager(manager).await;
                self.reconcile().await;
            }
            Err(e) => {
                tracing::warn!(?e, "Failed to refresh media session manager");
                self.refresh(RefreshRequest::FORCED).await;
            }
        }
    }
}
