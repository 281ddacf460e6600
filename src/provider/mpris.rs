//! Media sessions backed by MPRIS players on the D-Bus session bus.
//!
//! Every `org.mpris.MediaPlayer2.*` bus name is one session. MPRIS has no notion of a
//! current session, so the first player reporting `Playing` is treated as current, or the
//! first one reporting `Paused` when nothing plays.
//! Subscriptions are tasks forwarding zbus property streams into an [`EventSink`].

use std::{
    collections::HashMap,
    future::Future,
    ops::Deref as _,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use futures::future::join_all;
use futures_lite::StreamExt as _;
use tokio::{
    select,
    task::{spawn, JoinHandle},
    time::{interval, MissedTickBehavior},
};
use zbus::{
    fdo::DBusProxy,
    names::OwnedBusName,
    zvariant::{OwnedValue, Value},
    Connection,
};

use super::{
    EventSink, MediaProperties, MediaSession, PlaybackControls, PlaybackInfo, SessionManager,
    SessionProvider, SubscriptionToken, TimelineProperties,
};
use crate::{
    dbus::{player::PlayerProxy, player_buses, player_changes, player_id},
    media_info::PlaybackStatus,
    utils::{extract_str, lock},
};

/// How often a playing session reports timeline progress
const TIMELINE_INTERVAL: Duration = Duration::from_secs(1);

/// Subscription tasks keyed by token; aborted on removal or when the last owner drops
#[derive(Debug, Default)]
struct Subscriptions {
    next: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl Subscriptions {
    fn spawn<F>(&self, task: F) -> SubscriptionToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        lock(&self.tasks).insert(token, spawn(task));
        SubscriptionToken(token)
    }

    fn cancel(&self, token: SubscriptionToken) -> Result<()> {
        match lock(&self.tasks).remove(&token.0) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => bail!("Unknown subscription {token:?}"),
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (_, task) in lock(&self.tasks).drain() {
            task.abort();
        }
    }
}

/// Entry point: one D-Bus session bus connection
#[derive(Clone, Debug)]
pub struct MprisProvider {
    conn: Connection,
    http: reqwest::Client,
}

impl MprisProvider {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            http: reqwest::Client::new(),
        }
    }

    /// Connect to the session bus
    pub async fn session_bus() -> Result<Self> {
        let conn = Connection::session()
            .await
            .context("Failed to connect to D-Bus session bus")?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl SessionProvider for MprisProvider {
    type Manager = MprisManager;

    async fn request_manager(&self) -> Result<MprisManager> {
        let dbus = DBusProxy::new(&self.conn)
            .await
            .context("Failed to create DBusProxy")?;
        Ok(MprisManager {
            conn: self.conn.clone(),
            http: self.http.clone(),
            dbus,
            subscriptions: Arc::default(),
        })
    }
}

pub struct MprisManager {
    conn: Connection,
    http: reqwest::Client,
    dbus: DBusProxy<'static>,
    subscriptions: Arc<Subscriptions>,
}

impl MprisManager {
    async fn session(&self, name: OwnedBusName) -> Result<MprisSession> {
        let player = PlayerProxy::builder(&self.conn)
            .destination(name.clone())?
            .build()
            .await
            .with_context(|| format!("Failed to create player proxy for {name}"))?;
        Ok(MprisSession {
            bus: Arc::new(name),
            player,
            http: self.http.clone(),
            subscriptions: Arc::default(),
        })
    }
}

#[async_trait]
impl SessionManager for MprisManager {
    type Session = MprisSession;

    async fn current_session(&self) -> Result<Option<MprisSession>> {
        let (current, _) = self.current_and_sessions().await;
        current
    }

    async fn sessions(&self) -> Result<Vec<MprisSession>> {
        let names = player_buses(&self.dbus).await?;
        let sessions = join_all(names.into_iter().map(|name| self.session(name))).await;
        Ok(sessions
            .into_iter()
            .filter_map(|s| {
                s.inspect_err(|e| tracing::warn!(?e, "Failed to connect to player"))
                    .ok()
            })
            .collect())
    }

    /// Enumerates the bus once and picks the current player from that list
    async fn current_and_sessions(
        &self,
    ) -> (Result<Option<MprisSession>>, Result<Vec<MprisSession>>) {
        let sessions = match self.sessions().await {
            Ok(sessions) => sessions,
            Err(e) => return (Err(e), Ok(Vec::new())),
        };
        let statuses = join_all(sessions.iter().map(MprisSession::status)).await;
        let current = select_current(&statuses).map(|i| sessions[i].clone());
        (Ok(current), Ok(sessions))
    }

    async fn add_sessions_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        let mut changes = player_changes(self.dbus.clone()).await?;
        Ok(self.subscriptions.spawn(async move {
            while let Some(change) = changes.next().await {
                tracing::debug!(bus_name = %change.name, activity = ?change.activity, "MPRIS player changed");
                if !sink.notify() {
                    break;
                }
            }
        }))
    }

    async fn remove_sessions_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.subscriptions.cancel(token)
    }
}

/// One MPRIS player
#[derive(Clone)]
pub struct MprisSession {
    bus: Arc<OwnedBusName>,
    player: PlayerProxy<'static>,
    http: reqwest::Client,
    subscriptions: Arc<Subscriptions>,
}

impl std::fmt::Debug for MprisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MprisSession")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl MprisSession {
    /// Playback status, `None` when it cannot be read or parsed
    async fn status(&self) -> Option<PlaybackStatus> {
        let status = self
            .player
            .playback_status()
            .await
            .inspect_err(|e| {
                tracing::debug!(?e, bus_name = %self.bus, "Failed to get playback status");
            })
            .ok()?;
        status
            .parse()
            .inspect_err(|e| {
                tracing::debug!(?e, bus_name = %self.bus, "Unrecognised playback status");
            })
            .ok()
    }

    async fn metadata(&self) -> Result<HashMap<String, OwnedValue>> {
        self.player
            .metadata()
            .await
            .with_context(|| format!("Failed to get metadata of {}", self.bus))
    }

    async fn fetch_art(&self, url: &str) -> Result<Option<Vec<u8>>> {
        if let Some(path) = url.strip_prefix("file://") {
            let path = urlencoding::decode(path)
                .with_context(|| format!("Failed to decode artwork URL {url}"))?;
            let bytes = tokio::fs::read(&*path)
                .await
                .with_context(|| format!("Failed to read artwork {path}"))?;
            return Ok(Some(bytes));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .with_context(|| format!("Failed to fetch artwork {url}"))?;
            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to download artwork {url}"))?;
            return Ok(Some(bytes.to_vec()));
        }
        tracing::debug!(%url, "Unsupported artwork URL");
        Ok(None)
    }
}

/// Index of the player to treat as current: the first playing one, else the first paused one
fn select_current(statuses: &[Option<PlaybackStatus>]) -> Option<usize> {
    statuses
        .iter()
        .position(|s| *s == Some(PlaybackStatus::Playing))
        .or_else(|| {
            statuses
                .iter()
                .position(|s| *s == Some(PlaybackStatus::Paused))
        })
}

/// A cached boolean property; missing or unreadable counts as `false`
fn cached_flag(value: zbus::Result<Option<bool>>) -> bool {
    value.ok().flatten().unwrap_or_default()
}

fn metadata_str<'a>(metadata: &'a HashMap<String, OwnedValue>, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .map(|v| v.deref())
        .and_then(extract_str)
        .map(|s| s.as_str())
}

/// String lists such as `xesam:artist`; a few players send a plain string instead
fn metadata_strs(metadata: &HashMap<String, OwnedValue>, key: &str) -> Vec<String> {
    match metadata.get(key).map(|v| v.deref()) {
        Some(Value::Array(a)) => a
            .iter()
            .filter_map(extract_str)
            .map(|s| s.to_string())
            .collect(),
        Some(Value::Str(s)) => vec![s.to_string()],
        _ => Vec::new(),
    }
}

fn metadata_int(metadata: &HashMap<String, OwnedValue>, key: &str) -> Option<i64> {
    match metadata.get(key).map(|v| v.deref())? {
        Value::I32(v) => Some(i64::from(*v)),
        Value::U32(v) => Some(i64::from(*v)),
        Value::I64(v) => Some(*v),
        Value::U64(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn micros_to_seconds(micros: i64) -> f64 {
    micros.max(0) as f64 / 1_000_000.0
}

fn media_properties(metadata: &HashMap<String, OwnedValue>) -> MediaProperties {
    let mut artists = metadata_strs(metadata, "xesam:artist").into_iter();
    MediaProperties {
        title: metadata_str(metadata, "xesam:title")
            .unwrap_or_default()
            .to_owned(),
        artist: artists.next().unwrap_or_default(),
        additional_artists: artists.collect(),
        album_title: metadata_str(metadata, "xesam:album")
            .unwrap_or_default()
            .to_owned(),
        album_artist: metadata_strs(metadata, "xesam:albumArtist")
            .into_iter()
            .next()
            .unwrap_or_default(),
        track_number: metadata_int(metadata, "xesam:trackNumber")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or_default(),
    }
}

#[async_trait]
impl MediaSession for MprisSession {
    async fn source_app_id(&self) -> Result<String> {
        Ok(player_id(&self.bus).to_owned())
    }

    async fn media_properties(&self) -> Result<Option<MediaProperties>> {
        let metadata = self.metadata().await?;
        if metadata.is_empty() {
            return Ok(None);
        }
        Ok(Some(media_properties(&metadata)))
    }

    async fn playback_info(&self) -> Result<Option<PlaybackInfo>> {
        let status = self
            .player
            .playback_status()
            .await
            .with_context(|| format!("Failed to get playback status of {}", self.bus))?;
        let status = status.parse().unwrap_or_else(|e| {
            tracing::debug!(?e, bus_name = %self.bus, "Unrecognised playback status");
            PlaybackStatus::Unknown
        });
        // Reading the status above fills the property cache, so these cost no round trips
        let controls = PlaybackControls {
            can_play: cached_flag(self.player.cached_can_play()),
            can_pause: cached_flag(self.player.cached_can_pause()),
            can_stop: cached_flag(self.player.cached_can_control()),
            can_next: cached_flag(self.player.cached_can_go_next()),
            can_previous: cached_flag(self.player.cached_can_go_previous()),
        };
        Ok(Some(PlaybackInfo { status, controls }))
    }

    async fn timeline_properties(&self) -> Result<Option<TimelineProperties>> {
        let position = self
            .player
            .position()
            .await
            .with_context(|| format!("Failed to get position of {}", self.bus))?;
        let length = metadata_int(&self.metadata().await?, "mpris:length").unwrap_or_default();
        Ok(Some(TimelineProperties {
            position: micros_to_seconds(position),
            start_time: 0.0,
            end_time: micros_to_seconds(length),
        }))
    }

    async fn thumbnail(&self) -> Result<Option<Vec<u8>>> {
        let metadata = self.metadata().await?;
        match metadata_str(&metadata, "mpris:artUrl") {
            Some(url) if !url.is_empty() => self.fetch_art(url).await,
            _ => Ok(None),
        }
    }

    async fn add_media_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        let mut changes = self.player.receive_metadata_changed().await;
        Ok(self.subscriptions.spawn(async move {
            while changes.next().await.is_some() {
                if !sink.notify() {
                    break;
                }
            }
        }))
    }

    async fn remove_media_properties_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.subscriptions.cancel(token)
    }

    async fn add_playback_info_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        let mut changes = self.player.receive_playback_status_changed().await;
        Ok(self.subscriptions.spawn(async move {
            while changes.next().await.is_some() {
                if !sink.notify() {
                    break;
                }
            }
        }))
    }

    async fn remove_playback_info_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.subscriptions.cancel(token)
    }

    /// Fires on seeks, and once per [`TIMELINE_INTERVAL`] while the player is playing
    async fn add_timeline_properties_changed(&self, sink: EventSink) -> Result<SubscriptionToken> {
        let mut seeked = self
            .player
            .receive_seeked()
            .await
            .with_context(|| format!("Failed to listen for Seeked signal of {}", self.bus))?;
        let player = self.player.clone();
        Ok(self.subscriptions.spawn(async move {
            let mut ticker = interval(TIMELINE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let notify = select! {
                    Some(_) = seeked.next() => true,
                    _ = ticker.tick() => player
                        .playback_status()
                        .await
                        .is_ok_and(|s| s.eq_ignore_ascii_case("playing")),
                };
                if notify && !sink.notify() {
                    break;
                }
            }
        }))
    }

    async fn remove_timeline_properties_changed(&self, token: SubscriptionToken) -> Result<()> {
        self.subscriptions.cancel(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    fn metadata() -> HashMap<String, OwnedValue> {
        HashMap::from([
            ("xesam:title".to_owned(), owned(Value::from("Song1"))),
            ("xesam:artist".to_owned(), owned(Value::from(vec!["Artist1", "Artist2"]))),
            ("xesam:album".to_owned(), owned(Value::from("Album1"))),
            ("xesam:trackNumber".to_owned(), owned(Value::from(3_i32))),
            ("mpris:length".to_owned(), owned(Value::from(215_000_000_i64))),
        ])
    }

    #[test]
    fn parses_metadata() {
        let properties = media_properties(&metadata());
        assert_eq!(properties.title, "Song1");
        assert_eq!(properties.artist, "Artist1");
        assert_eq!(properties.additional_artists, ["Artist2"]);
        assert_eq!(properties.album_title, "Album1");
        assert!(properties.album_artist.is_empty());
        assert_eq!(properties.track_number, 3);
    }

    #[test]
    fn plain_string_artist() {
        let metadata = HashMap::from([("xesam:artist".to_owned(), owned(Value::from("Solo")))]);
        let properties = media_properties(&metadata);
        assert_eq!(properties.artist, "Solo");
        assert!(properties.additional_artists.is_empty());
        assert!(properties.title.is_empty());
    }

    #[test]
    fn track_length() {
        let length = metadata_int(&metadata(), "mpris:length").unwrap();
        assert!((micros_to_seconds(length) - 215.0).abs() < f64::EPSILON);
        assert!(micros_to_seconds(-5).abs() < f64::EPSILON);
    }

    #[test]
    fn playing_player_is_current() {
        use PlaybackStatus::{Paused, Playing};
        assert_eq!(select_current(&[Some(Paused), None, Some(Playing)]), Some(2));
        assert_eq!(select_current(&[Some(Playing), Some(Playing)]), Some(0));
    }

    #[test]
    fn paused_player_stays_current() {
        use PlaybackStatus::{Paused, Stopped};
        assert_eq!(select_current(&[Some(Stopped), None, Some(Paused)]), Some(2));
        assert_eq!(select_current(&[Some(Stopped), None]), None);
        assert_eq!(select_current(&[]), None);
    }

    #[test]
    fn uncached_controls_are_disabled() {
        assert!(cached_flag(Ok(Some(true))));
        assert!(!cached_flag(Ok(Some(false))));
        assert!(!cached_flag(Ok(None)));
        assert!(!cached_flag(Err(zbus::Error::InvalidReply)));
    }

    #[test]
    fn cancelling_unknown_subscription_fails() {
        let subscriptions = Subscriptions::default();
        assert!(subscriptions.cancel(SubscriptionToken(7)).is_err());
    }

    #[tokio::test]
    async fn cancelling_aborts_task() {
        let subscriptions = Subscriptions::default();
        let token = subscriptions.spawn(std::future::pending());
        assert_eq!(lock(&subscriptions.tasks).len(), 1);
        subscriptions.cancel(token).unwrap();
        assert!(subscriptions.cancel(token).is_err());
    }
}
