//! Observer fan-out for media and timeline notifications

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use anyhow::Result;

use crate::{media_info::MediaInfo, utils::lock};

/// Observer callback. An `Err` is logged and does not affect other observers.
pub type MediaCallback = Arc<dyn Fn(&MediaInfo) -> Result<()> + Send + Sync>;

/// Identifies a registered observer for later removal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

#[derive(Default)]
struct CallbackSet {
    next_id: u64,
    callbacks: Vec<(SubscriberId, MediaCallback)>,
}

impl CallbackSet {
    /// Registering the same callback twice returns the existing id
    fn insert(&mut self, callback: MediaCallback) -> SubscriberId {
        let ptr = Arc::as_ptr(&callback).cast::<()>();
        if let Some((id, _)) = self
            .callbacks
            .iter()
            .find(|(_, c)| Arc::as_ptr(c).cast::<()>() == ptr)
        {
            return *id;
        }
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, callback));
        id
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(i, _)| *i != id);
        self.callbacks.len() != before
    }

    fn snapshot(&self) -> Vec<(SubscriberId, MediaCallback)> {
        self.callbacks.clone()
    }
}

#[derive(Default)]
struct Registry {
    media_changed: CallbackSet,
    timeline_updated: CallbackSet,
}

/// Two independent observer sets: "media changed" and "timeline updated"
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.inner);
        f.debug_struct("Subscribers")
            .field("media_changed", &registry.media_changed.callbacks.len())
            .field("timeline_updated", &registry.timeline_updated.callbacks.len())
            .finish()
    }
}

impl Subscribers {
    pub fn on_media_changed(&self, callback: MediaCallback) -> SubscriberId {
        lock(&self.inner).media_changed.insert(callback)
    }

    pub fn on_timeline_updated(&self, callback: MediaCallback) -> SubscriberId {
        lock(&self.inner).timeline_updated.insert(callback)
    }

    /// Returns whether the observer was registered
    pub fn remove_media_changed(&self, id: SubscriberId) -> bool {
        lock(&self.inner).media_changed.remove(id)
    }

    /// Returns whether the observer was registered
    pub fn remove_timeline_updated(&self, id: SubscriberId) -> bool {
        lock(&self.inner).timeline_updated.remove(id)
    }

    pub fn dispatch_media_changed(&self, info: &MediaInfo) {
        let callbacks = lock(&self.inner).media_changed.snapshot();
        dispatch("media changed", &callbacks, info);
    }

    pub fn dispatch_timeline_updated(&self, info: &MediaInfo) {
        let callbacks = lock(&self.inner).timeline_updated.snapshot();
        dispatch("timeline updated", &callbacks, info);
    }
}

// Callbacks run outside the registry lock so they may (un)register observers themselves
fn dispatch(kind: &str, callbacks: &[(SubscriberId, MediaCallback)], info: &MediaInfo) {
    for (id, callback) in callbacks {
        match catch_unwind(AssertUnwindSafe(|| callback(info))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(?e, ?id, "Error in {kind} callback"),
            Err(_) => tracing::warn!(?id, "Panic in {kind} callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, MediaCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let callback: MediaCallback = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &MediaInfo| -> Result<()> {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        (count, callback)
    }

    #[test]
    fn registration_is_idempotent() {
        let subscribers = Subscribers::default();
        let (count, callback) = counter();

        let a = subscribers.on_media_changed(Arc::clone(&callback));
        let b = subscribers.on_media_changed(callback);
        assert_eq!(a, b);

        subscribers.dispatch_media_changed(&MediaInfo::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(subscribers.remove_media_changed(a));
        assert!(!subscribers.remove_media_changed(a));
        subscribers.dispatch_media_changed(&MediaInfo::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sets_are_independent() {
        let subscribers = Subscribers::default();
        let (media, media_callback) = counter();
        let (timeline, timeline_callback) = counter();
        subscribers.on_media_changed(media_callback);
        subscribers.on_timeline_updated(timeline_callback);

        subscribers.dispatch_timeline_updated(&MediaInfo::default());
        assert_eq!(media.load(Ordering::SeqCst), 0);
        assert_eq!(timeline.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_callbacks_do_not_block_delivery() {
        let subscribers = Subscribers::default();
        subscribers.on_media_changed(Arc::new(|_: &MediaInfo| -> Result<()> {
            bail!("display went away")
        }));
        subscribers.on_media_changed(Arc::new(|_: &MediaInfo| -> Result<()> {
            panic!("observer bug")
        }));
        let (count, callback) = counter();
        subscribers.on_media_changed(callback);

        subscribers.dispatch_media_changed(&MediaInfo::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
