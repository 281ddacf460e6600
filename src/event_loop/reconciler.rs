use super::{RefreshRequest, SessionOf, Worker};
use crate::provider::{MediaSession, SessionManager, SessionProvider};

impl<P: SessionProvider> Worker<P> {
    /// Decide which session is authoritative and which fallback session to keep tracked,
    /// then run a forced refresh.
    ///
    /// The provider's current session wins. A fallback-source session is only selected when
    /// the provider reports none, but stays subscribed while another session is current so
    /// that it can take over again once that session goes away.
    #[tracing::instrument(skip_all)]
    pub async fn reconcile(&mut self) {
        let (current, sessions) = match &self.manager {
            Some(attached) => {
                let (current, sessions) = attached.manager.current_and_sessions().await;
                let current = current
                    .inspect_err(|e| tracing::warn!(?e, "Failed to get current session"))
                    .ok()
                    .flatten();
                let sessions = sessions
                    .inspect_err(|e| tracing::warn!(?e, "Failed to enumerate sessions"))
                    .unwrap_or_default();
                (current, sessions)
            }
            None => (None, Vec::new()),
        };

        let pattern = self.config.fallback_source.clone();
        let mut fallback: Option<(SessionOf<P>, String)> = None;
        for session in sessions {
            match session.source_app_id().await {
                Ok(app_name) => {
                    tracing::debug!(%app_name, "Found media session");
                    if pattern.matches(&app_name) {
                        fallback = Some((session, app_name));
                    }
                }
                Err(e) => tracing::warn!(?e, "Failed to identify session, skipping"),
            }
        }

        let current = match current {
            Some(session) => {
                let app_name = session.source_app_id().await.unwrap_or_else(|e| {
                    tracing::warn!(?e, "Failed to identify current session");
                    String::new()
                });
                Some((session, app_name))
            }
            None => None,
        };

        let selected = match (current, &fallback) {
            (None, Some(fallback)) => {
                tracing::info!(app_name = %fallback.1, "No current session, using fallback source");
                Some(fallback.clone())
            }
            (current, _) => current,
        };

        let selected_is_fallback = selected
            .as_ref()
            .is_some_and(|(_, app_name)| pattern.matches(app_name));
        let track_fallback = fallback.is_some() && !selected_is_fallback;
        if track_fallback
            && self
                .state
                .snapshot()
                .is_some_and(|s| pattern.matches(&s.app_name))
        {
            tracing::info!(
                fallback_source = pattern.as_str(),
                "Current session moved away from fallback source, keeping it tracked"
            );
        }

        match selected {
            Some((session, app_name)) => {
                self.authoritative
                    .adopt(session, app_name, &self.events)
                    .await;
            }
            None => {
                tracing::info!("No media session available");
                self.authoritative.release().await;
            }
        }

        match fallback.filter(|_| track_fallback) {
            Some((session, app_name)) => {
                self.fallback.adopt(session, app_name, &self.events).await;
            }
            None => self.fallback.release().await,
        }

        self.refresh(RefreshRequest::FORCED).await;
    }

    /// A tracked fallback session reported activity while not authoritative
    pub async fn on_fallback_activity(&mut self) {
        let Some(session) = self.fallback.session().cloned() else {
            return;
        };
        match session.media_properties().await {
            Ok(Some(properties)) if !properties.title.trim().is_empty() => {
                tracing::info!(
                    title = %properties.title,
                    artist = %properties.artist,
                    "Fallback source has media, reconciling"
                );
                self.reconcile().await;
            }
            Ok(_) => tracing::debug!("Fallback source has no media"),
            Err(e) => tracing::warn!(?e, "Failed to get fallback source properties"),
        }
    }
}
