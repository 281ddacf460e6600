//! Scripted in-memory provider for tests

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    EventSink, MediaProperties, MediaSession, MonitorEvent, PlaybackInfo, SessionEventKind,
    SessionManager, SessionProvider, SubscriptionToken, TimelineProperties,
};
use crate::{media_info::PlaybackStatus, utils::lock};

#[derive(Debug, Default)]
struct Sinks {
    next: u64,
    sinks: HashMap<u64, EventSink>,
}

impl Sinks {
    fn add(&mut self, sink: EventSink) -> SubscriptionToken {
        self.next += 1;
        self.sinks.insert(self.next, sink);
        SubscriptionToken(self.next)
    }

    fn remove(&mut self, token: SubscriptionToken) -> Result<()> {
        match self.sinks.remove(&token.0) {
            Some(_) => Ok(()),
            None => bail!("unknown subscription {token:?}"),
        }
    }

    fn notify(&self, matches: impl Fn(MonitorEvent) -> bool) {
        for sink in self.sinks.values().filter(|s| matches(s.event())) {
            sink.notify();
        }
    }
}

#[derive(Debug, Default)]
struct SessionData {
    properties: Option<MediaProperties>,
    status: PlaybackStatus,
    timeline: Option<TimelineProperties>,
    thumbnail: Option<Vec<u8>>,
    thumbnail_requests: usize,
    failing_properties: usize,
    failing_timeline: bool,
    failing_unregister: bool,
    sinks: Sinks,
}

/// A media session whose answers are set by the test
#[derive(Clone, Debug)]
pub struct FakeSession {
    app_id: Arc<str>,
    data: Arc<Mutex<SessionData>>,
}

impl FakeSession {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.into(),
            data: Arc::default(),
        }
    }

    pub fn playing(app_id: &str, title: &str, artist: &str) -> Self {
        let session = Self::new(app_id);
        session.set_track(title, artist);
        session.set_status(PlaybackStatus::Playing);
        session
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn set_track(&self, title: &str, artist: &str) {
        let mut data = lock(&self.data);
        data.properties = Some(MediaProperties {
            title: title.to_owned(),
            artist: artist.to_owned(),
            album_title: "Album".to_owned(),
            ..MediaProperties::default()
        });
        data.thumbnail = Some(format!("art:{title}").into_bytes());
    }

    pub fn clear_track(&self) {
        lock(&self.data).properties = None;
    }

    pub fn set_status(&self, status: PlaybackStatus) {
        lock(&self.data).status = status;
    }

    pub fn set_timeline(&self, position: f64, end_time: f64) {
        lock(&self.data).timeline = Some(TimelineProperties {
            position,
            start_time: 0.0,
            end_time,
        });
    }

    /// The next `count` property reads fail
    pub fn fail_properties(&self, count: usize) {
        lock(&self.data).failing_properties = count;
    }

    pub fn fail_timeline(&self, failing: bool) {
        lock(&self.data).failing_timeline = failing;
    }

    pub fn fail_unregister(&self, failing: bool) {
        lock(&self.data).failing_unregister = failing;
    }

    pub fn thumbnail_requests(&self) -> usize {
        lock(&self.data).thumbnail_requests
    }

    pub fn subscriptions(&self) -> usize {
        lock(&self.data).sinks.sinks.len()
    }

    /// Deliver `kind` to every sink registered for it
    pub fn emit(&self, kind: SessionEventKind) {
        lock(&self.data).sinks.notify(|event| {
            matches!(event, MonitorEvent::Session { kind: k, .. } if k == kind)
        });
    }

    fn add(&self, sink: EventSink) -> SubscriptionToken {
        lock(&self.data).sinks.add(sink)
    }

    fn remove(&self, token: SubscriptionToken) -> Result<()> {
        let mut data = lock(&self.data);
        if data.failing_unregister {
            bail!("session already closed");
        }
        data.sinks.remove(token)
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn source_app_id(&self) -> Result<String> {
        Ok(self.app_id.to_string())
    }

    async fn media_properties(&self) -> Result<Option<MediaProperties>> {
        let mut data = lock(&self.data);
        if data.failing_properties > 0 {
            data.failing_properties -= 1;
            bail!("properties unavailable");
        }
        Ok(data.properties.clone())
    }

    async fn playback_info(&self) -> Result<Option<PlaybackInfo>> {
        Ok(Some(PlaybackInfo {
            status: lock(&self.data).status,
            ..PlaybackInfo::default()
        }))
    }

    async fn timeline_properties(&self) -> Result<Option<TimelineProperties>> {
        let data = lock(&self.data);
        if data.failing_timeline {
            bail!("timeline unavailable");
        }
        Ok(data.timeline)
    }

    async fn thumbnail(&self) -> Result<Option<Vec<u8>>> {
        let mut data = lock(&self.data);
        data.thumbnail_requests += 1;
        Ok(data.thumbnail.clone())
    }

    async fn add_media_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        Ok(self.add(sink))
    }
    async fn remove_media_properties_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.remove(token)
    }
    async fn add_playback_info_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        Ok(self.add(sink))
    }
    async fn remove_playback_info_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.remove(token)
    }
    async fn add_timeline_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        Ok(self.add(sink))
    }
    async fn remove_timeline_properties_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.remove(token)
    }
}

#[derive(Debug, Default)]
struct World {
    current: Option<FakeSession>,
    sessions: Vec<FakeSession>,
    sessions_changed: Sinks,
    failing_requests: bool,
    manager_requests: usize,
    enumerations: usize,
}

/// Host whose session list is set by the test
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    world: Arc<Mutex<World>>,
}

impl FakeProvider {
    /// Replace the session list; `current` must be one of `sessions` to be realistic
    pub fn set_sessions(&self, current: Option<&FakeSession>, sessions: &[&FakeSession]) {
        let mut world = lock(&self.world);
        world.current = current.cloned();
        world.sessions = sessions.iter().map(|s| (*s).clone()).collect();
    }

    pub fn fail_requests(&self, failing: bool) {
        lock(&self.world).failing_requests = failing;
    }

    pub fn manager_requests(&self) -> usize {
        lock(&self.world).manager_requests
    }

    /// How many times a manager listed the sessions
    pub fn enumerations(&self) -> usize {
        lock(&self.world).enumerations
    }

    pub fn sessions_changed_subscriptions(&self) -> usize {
        lock(&self.world).sessions_changed.sinks.len()
    }

    pub fn emit_sessions_changed(&self) {
        lock(&self.world).sessions_changed.notify(|_| true);
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    type Manager = FakeManager;

    async fn request_manager(&self) -> Result<FakeManager> {
        let mut world = lock(&self.world);
        world.manager_requests += 1;
        if world.failing_requests {
            bail!("session manager unavailable");
        }
        Ok(FakeManager {
            world: Arc::clone(&self.world),
        })
    }
}

#[derive(Debug)]
pub struct FakeManager {
    world: Arc<Mutex<World>>,
}

#[async_trait]
impl SessionManager for FakeManager {
    type Session = FakeSession;

    async fn current_session(&self) -> Result<Option<FakeSession>> {
        Ok(lock(&self.world).current.clone())
    }

    async fn sessions(&self) -> Result<Vec<FakeSession>> {
        let mut world = lock(&self.world);
        world.enumerations += 1;
        Ok(world.sessions.clone())
    }

    async fn current_and_sessions(
        &self,
    ) -> (Result<Option<FakeSession>>, Result<Vec<FakeSession>>) {
        let mut world = lock(&self.world);
        world.enumerations += 1;
        (Ok(world.current.clone()), Ok(world.sessions.clone()))
    }

    async fn add_sessions_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        Ok(lock(&self.world).sessions_changed.add(sink))
    }

    async fn remove_sessions_changed(&self, token: SubscriptionToken) -> Result<()> {
        lock(&self.world).sessions_changed.remove(token)
    }
}
