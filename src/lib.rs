//! Tracks the media sessions of the host and republishes a single consistent now-playing
//! state.
//!
//! [`Monitor`] drives a [`provider::SessionProvider`]; the read side and observer
//! registration live on [`MonitorHandle`].

pub mod config;
pub mod dbus;
pub mod event_loop;
pub mod media_info;
pub mod monitor;
pub mod out;
pub mod provider;
pub mod state;
pub mod subscribers;
pub mod thumbnail;
pub mod utils;

pub use monitor::{Monitor, MonitorHandle};
