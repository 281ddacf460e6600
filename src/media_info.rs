//! Point-in-time snapshot of what is playing

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use serde::{Serialize, Serializer};

/// Playback status reported by a media session
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    Closed,
    Opened,
    Changing,
    #[default]
    Unknown,
}
impl PlaybackStatus {
    /// Statuses that represent content actually being played
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
    /// Statuses that carry no content on their own
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Opened | Self::Closed | Self::Stopped)
    }
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Closed => "CLOSED",
            Self::Opened => "OPENED",
            Self::Changing => "CHANGING",
            Self::Unknown => "UNKNOWN",
        }
    }
}
impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for PlaybackStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "closed" => Ok(Self::Closed),
            "opened" => Ok(Self::Opened),
            "changing" => Ok(Self::Changing),
            "unknown" => Ok(Self::Unknown),
            _ => Err(anyhow!("Unknown PlaybackStatus {s}")),
        }
    }
}

/// Snapshot of the playback state of one media source.
///
/// A new snapshot is built on every refresh cycle and replaces the published one as a whole.
/// The only fields ever touched in place are the three timeline fields, see
/// [`MediaInfo::apply_timeline`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub artist: String,
    pub album_title: String,
    /// Opaque identifier of the source application
    pub app_name: String,
    pub status: PlaybackStatus,
    pub current_time_seconds: f64,
    pub duration_seconds: f64,
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_unix_seconds")]
    pub timestamp: SystemTime,
    pub additional_artists: Vec<String>,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            album_title: String::new(),
            app_name: String::new(),
            status: PlaybackStatus::Unknown,
            current_time_seconds: 0.0,
            duration_seconds: 0.0,
            thumbnail: None,
            timestamp: SystemTime::now(),
            additional_artists: Vec::new(),
        }
    }
}

impl MediaInfo {
    /// An empty `STOPPED` snapshot for `app_name`, published when playback ends
    #[must_use]
    pub fn stopped(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            status: PlaybackStatus::Stopped,
            ..Self::default()
        }
    }

    /// Whether the status/title combination represents real playback rather than provider noise.
    ///
    /// `CHANGING` with a title counts as meaningful.
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        self.status.is_active() || (self.has_title() && !self.status.is_idle())
    }

    /// Whether this snapshot shows content that is playing or paused
    #[must_use]
    pub fn is_playing_content(&self) -> bool {
        self.has_title() && self.status.is_active()
    }

    #[must_use]
    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    /// A difference in any identity-bearing field
    #[must_use]
    pub fn is_significant_change(&self, new: &Self) -> bool {
        self.title != new.title
            || self.artist != new.artist
            || self.album_title != new.album_title
            || self.app_name != new.app_name
            || self.status != new.status
    }

    /// Overwrite the timeline fields in place
    pub fn apply_timeline(&mut self, current_time_seconds: f64, duration_seconds: f64) {
        self.current_time_seconds = current_time_seconds;
        self.duration_seconds = duration_seconds;
        self.timestamp = SystemTime::now();
    }

    /// Playback progress in percent, if the duration is known
    #[must_use]
    pub fn progress_percent(&self) -> Option<usize> {
        if self.duration_seconds <= 0.0 {
            return None;
        }
        let ratio = (self.current_time_seconds / self.duration_seconds).clamp(0.0, 1.0);
        Some((ratio * 100.0).round() as usize)
    }

    /// Thumbnail cache key of the form `app_name:title:artist`
    #[must_use]
    pub fn thumbnail_key(&self) -> String {
        thumbnail_key(&self.app_name, &self.title, &self.artist)
    }

    /// JSON representation handed to display surfaces
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "has_thumbnail".to_owned(),
                serde_json::Value::Bool(self.thumbnail.is_some()),
            );
        }
        value
    }
}

/// Compose the thumbnail cache key for a source/track pair
#[must_use]
pub fn thumbnail_key(app_name: &str, title: &str, artist: &str) -> String {
    format!("{app_name}:{title}:{artist}")
}

/// Seconds since the Unix epoch, as a float
#[must_use]
pub fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

fn serialize_unix_seconds<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(unix_seconds(*time))
}

/// One entry of the bounded change log polled by display surfaces
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Monotonic id, milliseconds since the Unix epoch of the capture
    pub id: u64,
    #[serde(serialize_with = "serialize_media_info")]
    pub info: MediaInfo,
}

fn serialize_media_info<S: Serializer>(info: &MediaInfo, s: S) -> Result<S::Ok, S::Error> {
    info.to_json().serialize(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(title: &str, status: PlaybackStatus) -> MediaInfo {
        MediaInfo {
            title: title.to_owned(),
            artist: "Artist".to_owned(),
            app_name: "Spotify.exe".to_owned(),
            status,
            ..MediaInfo::default()
        }
    }

    #[test]
    fn meaningfulness() {
        assert!(info("", PlaybackStatus::Playing).is_meaningful());
        assert!(info("", PlaybackStatus::Paused).is_meaningful());
        assert!(info("Song", PlaybackStatus::Changing).is_meaningful());
        assert!(info("Song", PlaybackStatus::Unknown).is_meaningful());
        assert!(!info("", PlaybackStatus::Changing).is_meaningful());
        assert!(!info("Song", PlaybackStatus::Opened).is_meaningful());
        assert!(!info("Song", PlaybackStatus::Stopped).is_meaningful());
        assert!(!info("  ", PlaybackStatus::Closed).is_meaningful());
    }

    #[test]
    fn significance_ignores_timeline() {
        let old = info("Song", PlaybackStatus::Playing);
        let mut new = old.clone();
        new.apply_timeline(42.0, 180.0);
        new.thumbnail = Some(vec![1, 2, 3]);
        assert!(!old.is_significant_change(&new));

        new.album_title = "Album".to_owned();
        assert!(old.is_significant_change(&new));
        assert!(old.is_significant_change(&info("Song", PlaybackStatus::Paused)));
    }

    #[test]
    fn parse_status() {
        assert_eq!("Playing".parse::<PlaybackStatus>().unwrap(), PlaybackStatus::Playing);
        assert_eq!("STOPPED".parse::<PlaybackStatus>().unwrap(), PlaybackStatus::Stopped);
        assert!("rewinding".parse::<PlaybackStatus>().is_err());
    }

    #[test]
    fn json_omits_thumbnail_bytes() {
        let mut song = info("Song", PlaybackStatus::Playing);
        song.thumbnail = Some(vec![0xff, 0xd8]);
        let json = song.to_json();
        assert_eq!(json["status"], "PLAYING");
        assert_eq!(json["has_thumbnail"], true);
        assert_eq!(json["album_title"], "");
        assert!(json.get("thumbnail").is_none());
        assert!(json["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn progress() {
        let mut song = info("Song", PlaybackStatus::Playing);
        assert_eq!(song.progress_percent(), None);
        song.apply_timeline(45.0, 180.0);
        assert_eq!(song.progress_percent(), Some(25));
        song.apply_timeline(200.0, 180.0);
        assert_eq!(song.progress_percent(), Some(100));
    }

    #[test]
    fn stopped_snapshot_is_not_meaningful() {
        let stopped = MediaInfo::stopped("Spotify.exe");
        assert_eq!(stopped.app_name, "Spotify.exe");
        assert_eq!(stopped.status, PlaybackStatus::Stopped);
        assert!(!stopped.is_meaningful());
        assert_eq!(stopped.thumbnail_key(), "Spotify.exe::");
    }
}
