use super::ConnectionOrchestrator;
use crate::devices::{acquire_preferred, SwitchOutcome, SwitchTrigger};
use crate::error::{DeviceError, PeerlinkError, Result, SessionError};
use crate::media::MediaStream;
use crate::peer::{CallMetadata, SessionState, SignalingState};
use crate::signaling::OutboundSignal;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

fn not_ready<S: Into<String>>(reason: S) -> PeerlinkError {
    SessionError::NotReady {
        reason: reason.into(),
    }
    .into()
}

impl ConnectionOrchestrator {
    /// Open the best-ranked camera, falling back to audio only. Does not
    /// need an initialized session.
    pub async fn acquire_local_media(&self) -> Result<MediaStream> {
        let media = &self.inner.ctx.media;
        Ok(acquire_preferred(&self.inner.registry, media.as_ref()).await?)
    }

    /// Hand `stream` to the session and start watching its video
    pub async fn attach_local_media(&self, stream: MediaStream) -> Result<()> {
        let handles = self.handles().await?;
        handles.session.attach_local_stream(stream).await?;
        if handles.monitor.start().await {
            debug!("Health monitoring follows the attached stream");
        }
        Ok(())
    }

    /// Offer a call to `target_id` over the current session.
    ///
    /// Fails fast with `NotReady`, leaving everything untouched, unless the
    /// orchestrator is ready and the session is in the stable pre-call
    /// state.
    pub async fn start_call(&self, target_id: &str, metadata: CallMetadata) -> Result<()> {
        if !self.is_ready() {
            return Err(not_ready("orchestrator is not ready"));
        }
        let handles = self.handles().await?;

        match handles.session.signaling_state().await {
            Some(SignalingState::Stable) => {}
            other => {
                return Err(not_ready(format!("signaling state is {:?}", other)));
            }
        }
        let state = handles.session.state();
        if state != SessionState::Idle {
            return Err(not_ready(format!("session is {:?}", state)));
        }

        info!("Calling {} as {}", target_id, handles.self_id);
        handles.session.start_call(target_id, None, metadata).await
    }

    /// Manual camera toggle. Goes through the same switch path as recovery
    /// and re-arms automatic recovery afterwards.
    pub async fn switch_camera(&self) -> Result<SwitchOutcome> {
        let handles = self.handles().await?;
        if handles.switcher.is_switching() {
            return Err(DeviceError::SwitchInProgress.into());
        }

        handles.monitor.stop();
        let result = handles.switcher.switch_to_next(SwitchTrigger::Manual).await;
        let rearm = match &result {
            Err(PeerlinkError::Device(DeviceError::SwitchInProgress)) => {
                debug!("Recovery switch won the race, leaving its attempt count");
                true
            }
            Err(PeerlinkError::Session(SessionError::Closed)) => false,
            _ => {
                handles.monitor.reset();
                true
            }
        };
        if rearm {
            handles.monitor.start().await;
        }
        result
    }

    /// Send translated text to the peer over the data channel
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.handles().await?.session.send_text(text).await
    }

    /// Wait for the current session to connect. Returns `false` on timeout
    /// or when nothing is initialized.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        match self.session().await {
            Some(session) => session.wait_for_state(SessionState::Connected, timeout).await,
            None => false,
        }
    }

    /// Hang up and close the session. Clears readiness; safe to call at
    /// any time and more than once.
    pub async fn disconnect(&self) {
        self.inner.ready.store(false, Ordering::Release);
        self.inner.accepting.store(false, Ordering::Release);

        let Some(active) = self.inner.active.lock().await.take() else {
            return;
        };

        active.monitor.stop();

        if !active.session.is_closed() {
            if let Some(peer_id) = active.session.peer_id().await {
                let hang_up = OutboundSignal::HangUp {
                    to: peer_id.clone(),
                    from: active.self_id.clone(),
                };
                match self.inner.ctx.signaling.send(hang_up).await {
                    Ok(()) => debug!("Sent hang-up to {}", peer_id),
                    Err(e) => warn!("Hang-up to {} not delivered: {}", peer_id, e),
                }
            }
        }

        active.session.close().await;
        active.signals.abort();
        info!("Disconnected {}", active.self_id);
    }
}
