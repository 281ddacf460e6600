//! Boundary to the native media session provider.
//!
//! The monitor only ever talks to the platform through these traits. Subscriptions hand the
//! provider an [`EventSink`]; whatever thread the provider delivers its notifications on, the
//! sink turns them into tagged [`MonitorEvent`]s on the monitor's bounded inbound channel.

#[cfg(test)]
pub mod fake;
pub mod mpris;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::media_info::PlaybackStatus;

/// Media properties of a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaProperties {
    pub title: String,
    pub artist: String,
    pub album_title: String,
    pub album_artist: String,
    pub track_number: u32,
    pub additional_artists: Vec<String>,
}

/// Which transport controls a session currently accepts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackControls {
    pub can_play: bool,
    pub can_pause: bool,
    pub can_stop: bool,
    pub can_next: bool,
    pub can_previous: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackInfo {
    pub status: PlaybackStatus,
    pub controls: PlaybackControls,
}

/// Timeline of a session, all values in seconds
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimelineProperties {
    pub position: f64,
    pub start_time: f64,
    pub end_time: f64,
}
impl TimelineProperties {
    /// Total duration, falling back to the end time for sources that only report that
    #[must_use]
    pub fn duration(&self) -> f64 {
        let duration = self.end_time - self.start_time;
        if duration <= 0.0 && self.end_time > 0.0 {
            self.end_time
        } else {
            duration.max(0.0)
        }
    }
}

/// Opaque handle for a registered provider subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Per-session subscription kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    PropertiesChanged,
    PlaybackChanged,
    TimelineChanged,
}

impl SessionEventKind {
    /// Subscriptions registered against every adopted session
    pub const ALL: [Self; 3] = [
        Self::PropertiesChanged,
        Self::PlaybackChanged,
        Self::TimelineChanged,
    ];

    /// Register this kind of subscription against `session`
    pub async fn register<S: MediaSession>(
        self,
        session: &S,
        sink: EventSink,
    ) -> Result<SubscriptionToken> {
        match self {
            Self::PropertiesChanged => session.add_media_properties_changed(sink).await,
            Self::PlaybackChanged => session.add_playback_info_changed(sink).await,
            Self::TimelineChanged => session.add_timeline_properties_changed(sink).await,
        }
    }

    /// The teardown matching [`SessionEventKind::register`]
    pub async fn unregister<S: MediaSession>(
        self,
        session: &S,
        token: SubscriptionToken,
    ) -> Result<()> {
        match self {
            Self::PropertiesChanged => session.remove_media_properties_changed(token).await,
            Self::PlaybackChanged => session.remove_playback_info_changed(token).await,
            Self::TimelineChanged => session.remove_timeline_properties_changed(token).await,
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PropertiesChanged => "media_properties_changed",
            Self::PlaybackChanged => "playback_info_changed",
            Self::TimelineChanged => "timeline_properties_changed",
        })
    }
}

/// Registry slot a session subscription belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionSlot {
    /// The session currently driving published state
    Authoritative,
    /// A fallback-source session tracked while something else is authoritative
    Fallback,
}

impl fmt::Display for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authoritative => "authoritative",
            Self::Fallback => "fallback",
        })
    }
}

/// Events serialized onto the monitor worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorEvent {
    SessionsChanged,
    Session {
        slot: SessionSlot,
        kind: SessionEventKind,
    },
}

/// Where a provider subscription delivers its notifications
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<MonitorEvent>,
    event: MonitorEvent,
}

impl EventSink {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<MonitorEvent>, event: MonitorEvent) -> Self {
        Self { tx, event }
    }

    /// The event this sink emits
    #[must_use]
    pub const fn event(&self) -> MonitorEvent {
        self.event
    }

    /// Push the event without blocking the delivering thread.
    ///
    /// Returns `false` once the monitor has shut down.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(self.event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!(?event, "Monitor event channel full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Entry point into the native provider
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Manager: SessionManager;

    /// Obtain a fresh provider handle
    async fn request_manager(&self) -> Result<Self::Manager>;
}

/// Provider handle enumerating the sessions of the host
#[async_trait]
pub trait SessionManager: Send + Sync + 'static {
    type Session: MediaSession;

    /// The session the provider considers current, if any
    async fn current_session(&self) -> Result<Option<Self::Session>>;
    async fn sessions(&self) -> Result<Vec<Self::Session>>;

    /// [`SessionManager::current_session`] and [`SessionManager::sessions`] together, for
    /// providers that can answer both from a single enumeration
    async fn current_and_sessions(
        &self,
    ) -> (Result<Option<Self::Session>>, Result<Vec<Self::Session>>) {
        (self.current_session().await, self.sessions().await)
    }

    async fn add_sessions_changed(&self, sink: EventSink) -> Result<SubscriptionToken>;
    async fn remove_sessions_changed(&self, token: SubscriptionToken) -> Result<()>;
}

/// One application's media playback endpoint
#[async_trait]
pub trait MediaSession: Clone + Send + Sync + 'static {
    /// Identifier of the source application
    async fn source_app_id(&self) -> Result<String>;
    /// `None` when the session has no properties yet
    async fn media_properties(&self) -> Result<Option<MediaProperties>>;
    async fn playback_info(&self) -> Result<Option<PlaybackInfo>>;
    async fn timeline_properties(&self) -> Result<Option<TimelineProperties>>;
    /// Raw artwork bytes, `None` when the session has no artwork
    async fn thumbnail(&self) -> Result<Option<Vec<u8>>>;

    async fn add_media_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken>;
    async fn remove_media_properties_changed(&self, token: SubscriptionToken) -> Result<()>;
    async fn add_playback_info_changed(&self, sink: EventSink) -> Result<SubscriptionToken>;
    async fn remove_playback_info_changed(&self, token: SubscriptionToken) -> Result<()>;
    async fn add_timeline_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken>;
    async fn remove_timeline_properties_changed(&self, token: SubscriptionToken) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_duration() {
        let timeline = TimelineProperties {
            position: 10.0,
            start_time: 5.0,
            end_time: 65.0,
        };
        assert!((timeline.duration() - 60.0).abs() < f64::EPSILON);

        let end_only = TimelineProperties {
            position: 10.0,
            start_time: 90.0,
            end_time: 80.0,
        };
        assert!((end_only.duration() - 80.0).abs() < f64::EPSILON);

        assert!(TimelineProperties::default().duration().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sink_tags_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let event = MonitorEvent::Session {
            slot: SessionSlot::Fallback,
            kind: SessionEventKind::PlaybackChanged,
        };
        let sink = EventSink::new(tx, event);
        assert!(sink.notify());
        // Full channel drops silently
        assert!(sink.notify());
        assert_eq!(rx.recv().await, Some(event));

        drop(rx);
        assert!(!sink.notify());
    }
}
