use serde::Serialize;
use std::io::{self, Write};

use crate::{
    config::SourcePattern,
    media_info::{MediaInfo, PlaybackStatus},
};

/// What a display surface should show for the published snapshot
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayState {
    Playing(MediaInfo),
    Idle {
        status: PlaybackStatus,
        app_name: String,
    },
}

impl DisplayState {
    /// Project `snapshot` for display.
    ///
    /// Fallback-source snapshots are only shown while playing or paused; that source keeps
    /// stale titles around long after playback ended.
    #[must_use]
    pub fn project(snapshot: Option<&MediaInfo>, fallback_source: &SourcePattern) -> Self {
        let Some(info) = snapshot else {
            return Self::Idle {
                status: PlaybackStatus::Stopped,
                app_name: String::new(),
            };
        };
        let displayable = if fallback_source.matches(&info.app_name) {
            info.is_playing_content()
        } else {
            info.has_title() && !info.status.is_idle()
        };
        if displayable {
            Self::Playing(info.clone())
        } else {
            Self::Idle {
                status: info.status,
                app_name: info.app_name.clone(),
            }
        }
    }
}

/// A structure that can be serialized to JSON and parsed by Waybar.
#[derive(Serialize, Debug, Default)]
pub struct WaybarCustomModule {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tooltip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    percentage: Option<usize>,
}

/// `m:ss` rendering of a position in seconds
fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

impl WaybarCustomModule {
    /// Create a new module with the given contents.
    pub fn new(
        text: Option<&str>,
        alt: Option<&str>,
        tooltip: Option<&str>,
        class: Option<&str>,
        percentage: Option<usize>,
    ) -> Self {
        Self {
            text: text.map(html_escape::encode_text).map(String::from),
            alt: alt.map(html_escape::encode_text).map(String::from),
            tooltip: tooltip.map(html_escape::encode_text).map(String::from),
            class: class.map(html_escape::encode_text).map(String::from),
            percentage,
        }
    }

    /// Module for a display projection: `artist - title` while something plays, only the
    /// status class otherwise.
    pub fn from_display_state(state: &DisplayState) -> Self {
        match state {
            DisplayState::Playing(info) => {
                let text = if info.artist.is_empty() {
                    info.title.clone()
                } else {
                    format!("{} - {}", info.artist, info.title)
                };
                let mut tooltip = vec![info.title.as_str()];
                if !info.artist.is_empty() {
                    tooltip.push(&info.artist);
                }
                if !info.album_title.is_empty() {
                    tooltip.push(&info.album_title);
                }
                tooltip.push(&info.app_name);
                let position = (info.duration_seconds > 0.0).then(|| {
                    format!(
                        "{} / {}",
                        format_clock(info.current_time_seconds),
                        format_clock(info.duration_seconds)
                    )
                });
                if let Some(position) = &position {
                    tooltip.push(position);
                }
                let class = info.status.as_str().to_lowercase();
                Self::new(
                    Some(&text),
                    Some(&info.app_name),
                    Some(&tooltip.join("\n")),
                    Some(&class),
                    info.progress_percent(),
                )
            }
            DisplayState::Idle { status, app_name } => {
                let class = status.as_str().to_lowercase();
                let alt = (!app_name.is_empty()).then_some(app_name.as_str());
                Self::new(None, alt, None, Some(&class), None)
            }
        }
    }

    /// Format the module as JSON and write it to the given writer.
    ///
    /// # Errors
    ///
    /// This function will return an error if writing to the given writer fails.
    pub fn format<T: Write>(&self, mut f: &mut T) -> io::Result<()> {
        serde_json::to_writer(&mut f, self)?;
        f.write_all(b"\n")?;
        Ok(())
    }

    /// Print the module to stdout.
    ///
    /// # Errors
    ///
    /// This function will return an error if writing to stdout fails.
    pub fn print(&self) -> io::Result<()> {
        self.format(&mut io::stdout().lock())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn song(app_name: &str, status: PlaybackStatus) -> MediaInfo {
        MediaInfo {
            title: "Song1".to_owned(),
            artist: "Artist1".to_owned(),
            album_title: "Album1".to_owned(),
            app_name: app_name.to_owned(),
            status,
            current_time_seconds: 65.0,
            duration_seconds: 260.0,
            ..MediaInfo::default()
        }
    }

    #[test]
    fn test_format() {
        let module = WaybarCustomModule {
            text: Some("text".to_owned()),
            alt: Some("alt".to_owned()),
            tooltip: Some("tooltip".to_owned()),
            class: Some("class".to_owned()),
            percentage: Some(50),
        };
        let mut buf = Vec::new();
        module.format(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"text\":\"text\",\"alt\":\"alt\",\"tooltip\":\"tooltip\",\"class\":\"class\",\"percentage\":50}\n"
        );
    }

    #[test]
    fn test_missing_fields() {
        let mut buf = Vec::new();
        WaybarCustomModule::default().format(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{}\n");
    }

    #[test]
    fn test_playing_module() {
        let state = DisplayState::Playing(song("vlc", PlaybackStatus::Playing));
        let module = WaybarCustomModule::from_display_state(&state);
        assert_eq!(module.text.as_deref(), Some("Artist1 - Song1"));
        assert_eq!(
            module.tooltip.as_deref(),
            Some("Song1\nArtist1\nAlbum1\nvlc\n1:05 / 4:20")
        );
        assert_eq!(module.class.as_deref(), Some("playing"));
        assert_eq!(module.percentage, Some(25));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut info = song("vlc", PlaybackStatus::Paused);
        info.artist = "Simon & Garfunkel".to_owned();
        let module = WaybarCustomModule::from_display_state(&DisplayState::Playing(info));
        assert_eq!(module.text.as_deref(), Some("Simon &amp; Garfunkel - Song1"));
    }

    #[test]
    fn test_idle_module() {
        let state = DisplayState::Idle {
            status: PlaybackStatus::Stopped,
            app_name: "vlc".to_owned(),
        };
        let mut buf = Vec::new();
        WaybarCustomModule::from_display_state(&state)
            .format(&mut buf)
            .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"alt\":\"vlc\",\"class\":\"stopped\"}\n"
        );
    }

    #[test]
    fn test_projection() {
        let spotify = SourcePattern::default();
        assert!(matches!(
            DisplayState::project(None, &spotify),
            DisplayState::Idle { .. }
        ));

        let changing = song("vlc", PlaybackStatus::Changing);
        assert_eq!(
            DisplayState::project(Some(&changing), &spotify),
            DisplayState::Playing(changing.clone())
        );

        // The fallback source needs an active status
        let spotify_changing = song("Spotify.exe", PlaybackStatus::Changing);
        assert_eq!(
            DisplayState::project(Some(&spotify_changing), &spotify),
            DisplayState::Idle {
                status: PlaybackStatus::Changing,
                app_name: "Spotify.exe".to_owned(),
            }
        );
        let spotify_paused = song("Spotify.exe", PlaybackStatus::Paused);
        assert!(matches!(
            DisplayState::project(Some(&spotify_paused), &spotify),
            DisplayState::Playing(_)
        ));

        let stopped = MediaInfo::stopped("vlc");
        assert!(matches!(
            DisplayState::project(Some(&stopped), &spotify),
            DisplayState::Idle { .. }
        ));
    }
}
