use tokio::sync::mpsc;

use crate::provider::{
    EventSink, MediaSession, MonitorEvent, SessionEventKind, SessionSlot, SubscriptionToken,
};

/// A native session together with the subscriptions registered against it
#[derive(Debug)]
pub struct SessionHandle<S> {
    session: S,
    app_name: String,
    tokens: Vec<(SessionEventKind, SubscriptionToken)>,
}

impl<S: MediaSession> SessionHandle<S> {
    pub fn session(&self) -> &S {
        &self.session
    }
    pub fn app_name(&self) -> &str {
        &self.app_name
    }
}

/// Unregister every subscription of `handle`.
///
/// The provider may already have invalidated a subscription; that is logged and skipped.
pub async fn release<S: MediaSession>(handle: SessionHandle<S>, slot: SessionSlot) {
    let SessionHandle {
        session,
        app_name,
        tokens,
    } = handle;
    for (kind, token) in tokens {
        match kind.unregister(&session, token).await {
            Ok(()) => tracing::debug!(%slot, %kind, %app_name, "Unregistered session event handler"),
            Err(e) => {
                tracing::warn!(?e, %slot, %kind, %app_name, "Failed to unregister session event handler");
            }
        }
    }
}

/// One slot holding at most one adopted session
#[derive(Debug)]
pub struct SessionRegistry<S> {
    slot: SessionSlot,
    adopted: Option<SessionHandle<S>>,
}

impl<S: MediaSession> SessionRegistry<S> {
    pub const fn new(slot: SessionSlot) -> Self {
        Self {
            slot,
            adopted: None,
        }
    }

    pub fn session(&self) -> Option<&S> {
        self.adopted.as_ref().map(SessionHandle::session)
    }

    pub fn app_name(&self) -> Option<&str> {
        self.adopted.as_ref().map(SessionHandle::app_name)
    }

    /// Tear down the previous session's subscriptions, then subscribe to `session`
    pub async fn adopt(
        &mut self,
        session: S,
        app_name: String,
        events: &mpsc::Sender<MonitorEvent>,
    ) {
        self.release().await;

        let slot = self.slot;
        let mut tokens = Vec::with_capacity(SessionEventKind::ALL.len());
        for kind in SessionEventKind::ALL {
            let sink = EventSink::new(events.clone(), MonitorEvent::Session { slot, kind });
            match kind.register(&session, sink).await {
                Ok(token) => tokens.push((kind, token)),
                Err(e) => {
                    tracing::warn!(?e, %slot, %kind, %app_name, "Failed to register session event handler");
                }
            }
        }
        tracing::info!(%slot, %app_name, registered = tokens.len(), "Registered event handlers for session");

        self.adopted = Some(SessionHandle {
            session,
            app_name,
            tokens,
        });
    }

    /// Tear down the adopted session, if any
    pub async fn release(&mut self) {
        if let Some(handle) = self.adopted.take() {
            release(handle, self.slot).await;
        }
    }
}
