//! Lifecycle and read-side API of the media session monitor

use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::MonitorConfig,
    event_loop::Worker,
    media_info::{ChangeEvent, MediaInfo},
    out::DisplayState,
    provider::SessionProvider,
    state::SharedState,
    subscribers::{MediaCallback, SubscriberId, Subscribers},
    thumbnail::{ImageCrateTransform, ImageInfo, ImageTransform},
    utils::lock,
};

struct Running {
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

/// Cloneable read/subscribe handle, usable before and after the monitor starts
#[derive(Clone)]
pub struct MonitorHandle {
    config: Arc<MonitorConfig>,
    state: SharedState,
    subscribers: Subscribers,
    transform: Arc<dyn ImageTransform>,
    running: Arc<Mutex<Option<Running>>>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers)
            .finish_non_exhaustive()
    }
}

impl MonitorHandle {
    #[must_use]
    pub fn current_snapshot(&self) -> Option<MediaInfo> {
        self.state.snapshot()
    }

    #[must_use]
    pub fn display_state(&self) -> DisplayState {
        DisplayState::project(self.state.snapshot().as_ref(), &self.config.fallback_source)
    }

    #[must_use]
    pub fn changes_since(&self, last_id: u64) -> Vec<ChangeEvent> {
        self.state.changes_since(last_id)
    }

    #[must_use]
    pub fn thumbnail_bytes(&self) -> Option<Vec<u8>> {
        self.state.thumbnail()
    }

    /// Format and size of the published artwork. Undecodable artwork is logged and
    /// reported as absent.
    #[must_use]
    pub fn thumbnail_info(&self) -> Option<ImageInfo> {
        let bytes = self.state.thumbnail()?;
        self.transform
            .decode(&bytes)
            .inspect_err(|e| tracing::warn!(?e, size = bytes.len(), "Failed to decode artwork"))
            .ok()
    }

    pub fn on_media_changed(&self, callback: MediaCallback) -> SubscriberId {
        self.subscribers.on_media_changed(callback)
    }

    pub fn on_timeline_updated(&self, callback: MediaCallback) -> SubscriberId {
        self.subscribers.on_timeline_updated(callback)
    }

    pub fn remove_media_changed(&self, id: SubscriberId) -> bool {
        self.subscribers.remove_media_changed(id)
    }

    pub fn remove_timeline_updated(&self, id: SubscriberId) -> bool {
        self.subscribers.remove_timeline_updated(id)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Stop the worker and wait for it to unregister from the provider. Stopping twice
    /// is a no-op.
    pub async fn stop(&self) {
        let Some(Running { shutdown, worker }) = lock(&self.running).take() else {
            return;
        };
        // The worker may already be gone
        let _ = shutdown.send(());
        if let Err(e) = worker.await {
            tracing::warn!(?e, "Media session monitor worker failed");
        }
    }
}

/// A not yet started monitor over provider `P`
pub struct Monitor<P: SessionProvider> {
    provider: P,
    handle: MonitorHandle,
}

impl<P: SessionProvider> Monitor<P> {
    pub fn new(provider: P, config: MonitorConfig) -> Self {
        Self::with_transform(provider, config, Arc::new(ImageCrateTransform))
    }

    pub fn with_transform(
        provider: P,
        config: MonitorConfig,
        transform: Arc<dyn ImageTransform>,
    ) -> Self {
        Self {
            provider,
            handle: MonitorHandle {
                state: SharedState::new(config.change_log_capacity),
                config: Arc::new(config),
                subscribers: Subscribers::default(),
                transform,
                running: Arc::default(),
            },
        }
    }

    /// Handle for registering observers before [`Monitor::start`]
    #[must_use]
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Acquire the provider and spawn the worker, which reconciles once before handling
    /// events.
    ///
    /// # Errors
    ///
    /// Fails if the provider cannot hand out a session manager.
    pub async fn start(self) -> Result<MonitorHandle> {
        let Self { provider, handle } = self;
        let manager = provider
            .request_manager()
            .await
            .context("Failed to get media session manager")?;

        let config = MonitorConfig::clone(&handle.config);
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let mut worker = Worker::new(
            provider,
            config,
            handle.state.clone(),
            handle.subscribers.clone(),
            Arc::clone(&handle.transform),
            events_tx,
        );
        worker.attach_manager(manager).await;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(worker.run(events_rx, shutdown_rx));
        *lock(&handle.running) = Some(Running { shutdown, worker });
        tracing::info!("Media session monitor started");
        Ok(handle)
    }
}
