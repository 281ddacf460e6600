mod reconciler;
mod refresh_handler;
mod session_registry;
mod supervisor;

use std::sync::Arc;

use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{interval, MissedTickBehavior},
};

use crate::{
    config::MonitorConfig,
    provider::{
        EventSink, MonitorEvent, SessionEventKind, SessionManager, SessionProvider, SessionSlot,
        SubscriptionToken,
    },
    state::SharedState,
    subscribers::Subscribers,
    thumbnail::{ArtworkProcessor, ImageTransform, ThumbnailCache},
};

pub use refresh_handler::RefreshRequest;
pub use session_registry::{SessionHandle, SessionRegistry};
pub use supervisor::Supervisor;

type SessionOf<P> = <<P as SessionProvider>::Manager as SessionManager>::Session;

/// A provider handle together with its sessions-changed subscription
struct AttachedManager<M> {
    manager: M,
    token: Option<SubscriptionToken>,
}

/// The single worker owning all monitor state.
///
/// Native events, supervisor ticks and timeline ticks are all processed one at a time on
/// this worker, so nothing in here needs locking. Readers only ever see [`SharedState`].
pub struct Worker<P: SessionProvider> {
    provider: P,
    config: MonitorConfig,
    manager: Option<AttachedManager<P::Manager>>,
    authoritative: SessionRegistry<SessionOf<P>>,
    fallback: SessionRegistry<SessionOf<P>>,
    thumbnails: ThumbnailCache,
    artwork: ArtworkProcessor,
    state: SharedState,
    subscribers: Subscribers,
    events: mpsc::Sender<MonitorEvent>,
}

impl<P: SessionProvider> Worker<P> {
    pub fn new(
        provider: P,
        config: MonitorConfig,
        state: SharedState,
        subscribers: Subscribers,
        transform: Arc<dyn ImageTransform>,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            provider,
            thumbnails: ThumbnailCache::new(config.thumbnail_cache_capacity),
            artwork: ArtworkProcessor::new(
                config.fallback_source.clone(),
                config.crop_window,
                config.jpeg_quality,
                transform,
            ),
            config,
            manager: None,
            authoritative: SessionRegistry::new(SessionSlot::Authoritative),
            fallback: SessionRegistry::new(SessionSlot::Fallback),
            state,
            subscribers,
            events,
        }
    }

    /// The session currently driving published state
    pub fn authoritative(&self) -> &SessionRegistry<SessionOf<P>> {
        &self.authoritative
    }

    /// The fallback-source session tracked alongside the authoritative one
    pub fn fallback(&self) -> &SessionRegistry<SessionOf<P>> {
        &self.fallback
    }

    /// Switch to `manager`, moving the sessions-changed subscription over to it
    pub async fn attach_manager(&mut self, manager: P::Manager) {
        let sink = EventSink::new(self.events.clone(), MonitorEvent::SessionsChanged);
        let token = manager
            .add_sessions_changed(sink)
            .await
            .inspect_err(|e| tracing::warn!(?e, "Failed to register sessions changed handler"))
            .ok();

        if let Some(AttachedManager { manager, token }) = self.manager.take() {
            if let Some(token) = token {
                if let Err(e) = manager.remove_sessions_changed(token).await {
                    tracing::warn!(?e, "Failed to unregister sessions changed handler");
                }
            }
        }
        self.manager = Some(AttachedManager { manager, token });
    }

    /// Process events until `shutdown` fires or its sender goes away
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<MonitorEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        tracing::info!("Starting media session monitoring");
        self.reconcile().await;

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut supervisor = Supervisor::new(self.config.ticks_per_refresh());

        loop {
            select! {
                Some(event) = events.recv() => self.handle_event(event).await,
                _ = ticker.tick() => {
                    if supervisor.tick() {
                        self.supervise().await;
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Stopping media session monitoring");
                    break;
                }
            }
        }

        self.teardown().await;
    }

    pub async fn handle_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::SessionsChanged => {
                tracing::info!("Media sessions changed, checking for new current session");
                self.reconcile().await;
            }
            MonitorEvent::Session {
                slot: SessionSlot::Authoritative,
                kind,
            } => {
                tracing::debug!(%kind, app_name = ?self.authoritative.app_name(), "Session event received");
                match kind {
                    SessionEventKind::PropertiesChanged | SessionEventKind::PlaybackChanged => {
                        self.refresh(RefreshRequest::CHANGED).await;
                    }
                    SessionEventKind::TimelineChanged => {
                        self.refresh(RefreshRequest::TIMELINE).await;
                    }
                }
            }
            MonitorEvent::Session {
                slot: SessionSlot::Fallback,
                kind: SessionEventKind::TimelineChanged,
            } => {}
            MonitorEvent::Session {
                slot: SessionSlot::Fallback,
                kind,
            } => {
                tracing::debug!(%kind, app_name = ?self.fallback.app_name(), "Fallback session changed while not current");
                self.on_fallback_activity().await;
            }
        }
    }

    /// Unregister everything this worker registered with the provider
    pub async fn teardown(&mut self) {
        self.authoritative.release().await;
        self.fallback.release().await;
        if let Some(AttachedManager {
            manager,
            token: Some(token),
        }) = self.manager.take()
        {
            if let Err(e) = manager.remove_sessions_changed(token).await {
                tracing::warn!(?e, "Failed to unregister sessions changed handler");
            }
        }
    }
}
