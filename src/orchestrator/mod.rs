//! Gatekeeper for "is it safe to start a call" and owner of the
//! per-participant session wiring.

mod calls;
mod signals;

#[cfg(test)]
mod tests;

use crate::context::SessionContext;
use crate::devices::{CameraSwitcher, DeviceRegistry};
use crate::error::{Result, SessionError};
use crate::health::HealthMonitor;
use crate::media::RemoteStream;
use crate::peer::{PeerSession, RemoteStreamHandler};
use signals::spawn_signal_pump;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Application callback for the remote stream of every call
pub type SharedRemoteHandler = Arc<dyn Fn(RemoteStream) + Send + Sync>;

/// Components wired around one open peer session
pub(super) struct ActiveSession {
    pub(super) self_id: String,
    pub(super) session: PeerSession,
    pub(super) switcher: Arc<CameraSwitcher>,
    pub(super) monitor: HealthMonitor,
    pub(super) signals: JoinHandle<()>,
}

/// Clones of the active components, taken so no lock is held across
/// long-running work
#[derive(Clone)]
pub(super) struct SessionHandles {
    pub(super) self_id: String,
    pub(super) session: PeerSession,
    pub(super) switcher: Arc<CameraSwitcher>,
    pub(super) monitor: HealthMonitor,
}

pub(super) struct OrchestratorInner {
    pub(super) ctx: SessionContext,
    pub(super) registry: Arc<DeviceRegistry>,
    /// Set only once the session is open and signaling is wired
    pub(super) ready: AtomicBool,
    pub(super) accepting: AtomicBool,
    pub(super) active: Mutex<Option<ActiveSession>>,
    pub(super) remote_handler: parking_lot::Mutex<Option<SharedRemoteHandler>>,
}

/// Owns the peer session of one participant together with its camera
/// switcher, health monitor and inbound signaling.
///
/// Readiness is explicit state: it is raised by `initialize` after the
/// session is open and subscribed to signaling, and cleared by `disconnect`
/// or by the peer hanging up.
#[derive(Clone)]
pub struct ConnectionOrchestrator {
    pub(super) inner: Arc<OrchestratorInner>,
}

impl ConnectionOrchestrator {
    pub fn new(ctx: SessionContext) -> Self {
        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&ctx.media),
            ctx.config.devices.cache_validity(),
        ));
        Self {
            inner: Arc::new(OrchestratorInner {
                ctx,
                registry,
                ready: AtomicBool::new(false),
                accepting: AtomicBool::new(false),
                active: Mutex::new(None),
                remote_handler: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Open a fresh peer session for `self_id` and wire inbound signaling to
    /// it. Any previous session is disconnected first.
    pub async fn initialize(&self, self_id: &str) -> Result<()> {
        self.disconnect().await;

        let ctx = &self.inner.ctx;
        let session = PeerSession::new(ctx);
        session.open(self_id).await?;

        let events = match ctx.signaling.subscribe(self_id).await {
            Ok(events) => events,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let handler = self.inner.remote_handler.lock().clone();
        if let Some(handler) = handler {
            session.set_remote_handler(one_shot(handler)).await;
        }

        let switcher = Arc::new(CameraSwitcher::new(
            ctx,
            Arc::clone(&self.inner.registry),
            session.clone(),
        ));
        let monitor = HealthMonitor::new(ctx, session.clone(), Arc::clone(&switcher));
        let signals = spawn_signal_pump(
            Arc::downgrade(&self.inner),
            session.clone(),
            monitor.clone(),
            events,
        );

        *self.inner.active.lock().await = Some(ActiveSession {
            self_id: self_id.to_string(),
            session,
            switcher,
            monitor,
            signals,
        });
        self.inner.ready.store(true, Ordering::Release);
        info!("Orchestrator ready as {}", self_id);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Whether incoming offers are answered
    pub fn is_accepting_calls(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Answer incoming offers from now on (receiver role)
    pub fn accept_incoming_calls(&self, accept: bool) {
        self.inner.accepting.store(accept, Ordering::Release);
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.ctx
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// The current peer session, if one was initialized
    pub async fn session(&self) -> Option<PeerSession> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    pub async fn self_id(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.self_id.clone())
    }

    pub async fn health_monitor(&self) -> Option<HealthMonitor> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.monitor.clone())
    }

    /// Register the application's remote stream callback. It applies to the
    /// current session and every session initialized afterwards.
    pub async fn set_remote_stream_handler<F>(&self, handler: F)
    where
        F: Fn(RemoteStream) + Send + Sync + 'static,
    {
        let handler: SharedRemoteHandler = Arc::new(handler);
        *self.inner.remote_handler.lock() = Some(Arc::clone(&handler));
        if let Some(session) = self.session().await {
            session.set_remote_handler(one_shot(handler)).await;
        }
    }

    pub(super) async fn handles(&self) -> Result<SessionHandles> {
        let active = self.inner.active.lock().await;
        active
            .as_ref()
            .map(|active| SessionHandles {
                self_id: active.self_id.clone(),
                session: active.session.clone(),
                switcher: Arc::clone(&active.switcher),
                monitor: active.monitor.clone(),
            })
            .ok_or_else(|| {
                SessionError::NotReady {
                    reason: "orchestrator is not initialized".to_string(),
                }
                .into()
            })
    }
}

pub(super) fn one_shot(handler: SharedRemoteHandler) -> RemoteStreamHandler {
    Box::new(move |stream| handler(stream))
}
