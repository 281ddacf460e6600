//! Tunables of the media session monitor

use std::time::Duration;

/// Case-insensitive substring match on a source identifier.
///
/// Used to recognise the fallback source (a Spotify-like player whose session the
/// provider tends to stop reporting as current).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePattern(String);
impl SourcePattern {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self(pattern.to_lowercase())
    }
    #[must_use]
    pub fn matches(&self, app_name: &str) -> bool {
        !self.0.is_empty() && app_name.to_lowercase().contains(&self.0)
    }
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Default for SourcePattern {
    fn default() -> Self {
        Self::new("spotify")
    }
}

/// Crop window applied to fallback-source artwork
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}
impl CropWindow {
    /// Whether an image of the given size fully contains the window
    #[must_use]
    pub const fn fits(&self, width: u32, height: u32) -> bool {
        width >= self.x + self.width && height >= self.y + self.height
    }
}
impl Default for CropWindow {
    fn default() -> Self {
        Self {
            x: 33,
            y: 0,
            width: 234,
            height: 234,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Period of the forced reconciliation cycle
    pub refresh_interval: Duration,
    /// Scheduling grain of the worker
    pub tick: Duration,
    pub thumbnail_cache_capacity: usize,
    pub change_log_capacity: usize,
    pub fallback_source: SourcePattern,
    /// Capacity of the inbound native event channel
    pub event_channel_capacity: usize,
    pub crop_window: CropWindow,
    pub jpeg_quality: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            tick: Duration::from_secs(1),
            thumbnail_cache_capacity: 20,
            change_log_capacity: 5,
            fallback_source: SourcePattern::default(),
            event_channel_capacity: 64,
            crop_window: CropWindow::default(),
            jpeg_quality: 95,
        }
    }
}

impl MonitorConfig {
    /// Number of ticks between two forced reconciliation cycles, at least one
    #[must_use]
    pub fn ticks_per_refresh(&self) -> u32 {
        let tick = self.tick.as_secs_f64();
        if tick <= 0.0 {
            return 1;
        }
        ((self.refresh_interval.as_secs_f64() / tick).ceil() as u32).max(1)
    }
}
