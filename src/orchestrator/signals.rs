use super::OrchestratorInner;
use crate::events::PeerlinkEvent;
use crate::health::HealthMonitor;
use crate::peer::PeerSession;
use crate::signaling::{SignalingEvent, SignalingEvents};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dispatch inbound signaling for one session until it closes, the
/// subscription ends or the orchestrator goes away.
pub(super) fn spawn_signal_pump(
    weak: Weak<OrchestratorInner>,
    session: PeerSession,
    monitor: HealthMonitor,
    mut events: SignalingEvents,
) -> JoinHandle<()> {
    let closed = session.closed_token();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Signaling subscription ended");
                        break;
                    }
                },
            };

            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !dispatch(&inner, &session, &monitor, event).await {
                break;
            }
        }
        debug!("Signal pump stopped");
    })
}

/// Handle one inbound signal. Returns `false` once the session is over.
async fn dispatch(
    inner: &OrchestratorInner,
    session: &PeerSession,
    monitor: &HealthMonitor,
    event: SignalingEvent,
) -> bool {
    let events = &inner.ctx.events;
    match event {
        SignalingEvent::CallMade {
            from,
            offer,
            metadata,
        } => {
            if !inner.accepting.load(Ordering::Acquire) {
                debug!("Ignoring call from {}, not accepting calls", from);
                return true;
            }
            info!("Incoming call from {}", from);
            if let Some(code) = metadata.caller_lang {
                events.publish(PeerlinkEvent::CallerLanguage { code });
            }
            if let Err(e) = session.handle_incoming_offer(&from, offer, None, None).await {
                warn!("Could not answer {}: {}", from, e);
                events.publish(PeerlinkEvent::error("orchestrator", &e));
            }
        }
        SignalingEvent::CallAccepted { from, answer } => {
            debug!("Answer received from {}", from);
            if let Err(e) = session.handle_answer(answer).await {
                warn!("Could not apply answer from {}: {}", from, e);
                events.publish(PeerlinkEvent::error("orchestrator", &e));
            }
        }
        SignalingEvent::IceCandidate { from, candidate } => {
            if let Err(e) = session.add_remote_candidate(&from, candidate).await {
                warn!("Rejected ICE candidate from {}: {}", from, e);
            }
        }
        SignalingEvent::CallEnded { from } => {
            if session.peer_id().await.as_deref() != Some(from.as_str()) {
                debug!("Ignoring hang-up from {}, not our peer", from);
                return true;
            }
            info!("{} hung up", from);
            monitor.stop();
            inner.ready.store(false, Ordering::Release);
            session.close().await;
            return false;
        }
    }
    true
}
