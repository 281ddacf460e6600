//! Published state shared between the monitor worker and its readers

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use crate::{
    media_info::{unix_seconds, ChangeEvent, MediaInfo},
    utils::lock,
};

#[derive(Debug)]
struct Published {
    /// The last published snapshot
    snapshot: Option<MediaInfo>,
    /// Recent significant changes, oldest first
    changes: VecDeque<ChangeEvent>,
    capacity: usize,
    last_id: u64,
}

impl Published {
    /// Ids follow capture time but never repeat or go backwards
    fn next_id(&mut self, at: SystemTime) -> u64 {
        let id = unix_millis(at).max(self.last_id + 1);
        self.last_id = id;
        id
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    (unix_seconds(at) * 1000.0) as u64
}

/// Single-lock view of the last published snapshot and the change log.
///
/// The lock is only ever held to copy or swap values, never across a provider call. A
/// publication replaces the snapshot as a whole; the timeline fields are the one exception
/// and are updated in place.
#[derive(Clone, Debug)]
pub struct SharedState {
    inner: Arc<Mutex<Published>>,
}

impl SharedState {
    #[must_use]
    pub fn new(change_log_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Published {
                snapshot: None,
                changes: VecDeque::with_capacity(change_log_capacity + 1),
                capacity: change_log_capacity,
                last_id: 0,
            })),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<MediaInfo> {
        lock(&self.inner).snapshot.clone()
    }

    /// Replace the published snapshot, appending it to the change log if `log_change`
    pub fn publish(&self, info: MediaInfo, log_change: bool) {
        let mut published = lock(&self.inner);
        if log_change {
            let id = published.next_id(info.timestamp);
            published.changes.push_back(ChangeEvent {
                id,
                info: info.clone(),
            });
            while published.changes.len() > published.capacity {
                published.changes.pop_front();
            }
        }
        published.snapshot = Some(info);
    }

    /// Overwrite the timeline of the published snapshot, returning the updated copy
    pub fn update_timeline(
        &self,
        current_time_seconds: f64,
        duration_seconds: f64,
    ) -> Option<MediaInfo> {
        let mut published = lock(&self.inner);
        let snapshot = published.snapshot.as_mut()?;
        snapshot.apply_timeline(current_time_seconds, duration_seconds);
        Some(snapshot.clone())
    }

    /// Change events with an id above `last_id`.
    ///
    /// A first poll (`last_id == 0`) with nothing logged gets the current snapshot as a
    /// synthesized entry.
    #[must_use]
    pub fn changes_since(&self, last_id: u64) -> Vec<ChangeEvent> {
        let published = lock(&self.inner);
        let mut changes: Vec<_> = published
            .changes
            .iter()
            .filter(|c| c.id > last_id)
            .cloned()
            .collect();
        if last_id == 0 && changes.is_empty() {
            if let Some(snapshot) = &published.snapshot {
                changes.push(ChangeEvent {
                    id: unix_millis(SystemTime::now()).max(published.last_id),
                    info: snapshot.clone(),
                });
            }
        }
        changes
    }

    /// Artwork of the published snapshot
    #[must_use]
    pub fn thumbnail(&self) -> Option<Vec<u8>> {
        lock(&self.inner)
            .snapshot
            .as_ref()
            .and_then(|s| s.thumbnail.clone())
    }
}
