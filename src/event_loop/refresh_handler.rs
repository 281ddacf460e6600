use std::time::SystemTime;

use super::Worker;
use crate::{
    media_info::MediaInfo,
    provider::{MediaSession, SessionProvider},
};

/// How a refresh cycle was triggered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Notify change observers even when nothing significant changed
    pub force_notify: bool,
    /// Only the timeline moved; try the cheap path first
    pub timeline_only: bool,
}

impl RefreshRequest {
    /// A native change event: notify only on significant changes
    pub const CHANGED: Self = Self {
        force_notify: false,
        timeline_only: false,
    };
    /// Reconciliation and supervisor cycles
    pub const FORCED: Self = Self {
        force_notify: true,
        timeline_only: false,
    };
    pub const TIMELINE: Self = Self {
        force_notify: false,
        timeline_only: true,
    };
}

impl<P: SessionProvider> Worker<P> {
    #[tracing::instrument(skip_all, fields(force_notify = request.force_notify, timeline_only = request.timeline_only))]
    pub async fn refresh(&mut self, request: RefreshRequest) {
        let published = self.state.snapshot();

        if request.timeline_only {
            if let Some(published) = &published {
                let Some(session) = self.authoritative.session() else {
                    tracing::debug!("No authoritative session on timeline update, clearing");
                    self.publish_cleared(published.app_name.clone(), Some(published));
                    return;
                };
                match session.timeline_properties().await {
                    Ok(Some(timeline)) => {
                        if let Some(updated) = self
                            .state
                            .update_timeline(timeline.position, timeline.duration())
                        {
                            tracing::trace!(
                                position = updated.current_time_seconds,
                                duration = updated.duration_seconds,
                                "Timeline updated"
                            );
                            self.subscribers.dispatch_timeline_updated(&updated);
                        }
                        return;
                    }
                    Ok(None) => tracing::debug!("Session has no timeline, doing full refresh"),
                    Err(e) => tracing::warn!(?e, "Failed to get timeline, doing full refresh"),
                }
            }
        }

        self.refresh_full(request.force_notify, published).await;
    }

    async fn refresh_full(&mut self, force_notify: bool, published: Option<MediaInfo>) {
        let Some(session) = self.authoritative.session().cloned() else {
            match published {
                Some(published) if published.is_meaningful() => {
                    tracing::info!("No media session, clearing published media");
                    self.publish_cleared(published.app_name.clone(), Some(&published));
                }
                _ => tracing::debug!("No media session"),
            }
            return;
        };

        let Some(mut info) = fetch_media_info(&session).await else {
            return;
        };

        if !info.is_meaningful() {
            if published.as_ref().is_some_and(MediaInfo::is_playing_content) {
                tracing::info!(app_name = %info.app_name, status = %info.status, "Media stopped");
                self.publish_cleared(info.app_name, published.as_ref());
            } else {
                tracing::debug!(app_name = %info.app_name, status = %info.status, "Ignoring media without content");
            }
            return;
        }

        info.thumbnail = self.attach_thumbnail(&session, &info).await;

        let significant = published
            .as_ref()
            .map_or(true, |p| p.is_significant_change(&info));
        if significant {
            tracing::info!(
                title = %info.title,
                artist = %info.artist,
                app_name = %info.app_name,
                status = %info.status,
                "Media changed"
            );
        }
        self.state.publish(info.clone(), significant);
        if significant || force_notify {
            self.subscribers.dispatch_media_changed(&info);
        }
    }

    /// Publish a STOPPED snapshot and tell change observers, always
    fn publish_cleared(&self, app_name: String, published: Option<&MediaInfo>) {
        let cleared = MediaInfo::stopped(app_name);
        let significant = published.map_or(true, |p| p.is_significant_change(&cleared));
        self.state.publish(cleared.clone(), significant);
        self.subscribers.dispatch_media_changed(&cleared);
    }

    async fn attach_thumbnail<S: MediaSession>(
        &mut self,
        session: &S,
        info: &MediaInfo,
    ) -> Option<Vec<u8>> {
        let key = info.thumbnail_key();
        if let Some(bytes) = self.thumbnails.get(&key) {
            tracing::trace!(%key, "Thumbnail cache hit");
            return Some(bytes.to_vec());
        }

        match session.thumbnail().await {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                let processed = self.artwork.process(&info.app_name, bytes);
                self.thumbnails.put(key, processed.clone());
                Some(processed)
            }
            Ok(_) => {
                tracing::debug!(%key, "Session has no artwork");
                None
            }
            Err(e) => {
                tracing::warn!(?e, %key, "Failed to get artwork");
                None
            }
        }
    }
}

/// Capture one snapshot of `session`, or `None` if it cannot be read right now
async fn fetch_media_info<S: MediaSession>(session: &S) -> Option<MediaInfo> {
    let properties = match session.media_properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => {
            tracing::debug!("Session has no media properties");
            return None;
        }
        Err(e) => {
            tracing::warn!(?e, "Failed to get media properties");
            return None;
        }
    };
    let playback = match session.playback_info().await {
        Ok(Some(playback)) => playback,
        Ok(None) => {
            tracing::debug!("Session has no playback info");
            return None;
        }
        Err(e) => {
            tracing::warn!(?e, "Failed to get playback info");
            return None;
        }
    };
    let timeline = session
        .timeline_properties()
        .await
        .inspect_err(|e| tracing::debug!(?e, "Failed to get timeline"))
        .ok()
        .flatten()
        .unwrap_or_default();
    let app_name = match session.source_app_id().await {
        Ok(app_name) => app_name,
        Err(e) => {
            tracing::warn!(?e, "Failed to get source app");
            return None;
        }
    };

    Some(MediaInfo {
        title: properties.title,
        artist: properties.artist,
        album_title: properties.album_title,
        app_name,
        status: playback.status,
        current_time_seconds: timeline.position,
        duration_seconds: timeline.duration(),
        thumbnail: None,
        timestamp: SystemTime::now(),
        additional_artists: properties.additional_artists,
    })
}
