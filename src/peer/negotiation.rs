use super::connection::{IceCandidate, PeerConnection, SessionDescription, SignalingState};
use super::session::{PeerSession, RemoteStreamHandler, SessionCore};
use super::{DataChannelStatus, Role, SessionState};
use crate::error::{PeerlinkError, Result, SessionError};
use crate::media::MediaStream;
use crate::signaling::{CallMetadata, OutboundSignal};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn not_ready<S: Into<String>>(reason: S) -> PeerlinkError {
    SessionError::NotReady {
        reason: reason.into(),
    }
    .into()
}

fn negotiation(details: impl std::fmt::Display) -> PeerlinkError {
    SessionError::Negotiation {
        details: details.to_string(),
    }
    .into()
}

/// Release a stream handed to a call setup that never took it
fn discard_stream(stream: Option<MediaStream>) {
    if let Some(stream) = stream {
        let stopped = stream.stop();
        debug!("Stopped {} tracks of unused stream {}", stopped, stream.id());
    }
}

impl PeerSession {
    /// Check every precondition for a new call and claim the negotiating
    /// marker. Nothing is mutated when this fails.
    fn claim_call_setup(&self, core: &SessionCore) -> Result<Arc<dyn PeerConnection>> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        let Some(connection) = core.connection.clone() else {
            return Err(not_ready("peer session is not open"));
        };
        let signaling = connection.signaling_state();
        if signaling != SignalingState::Stable {
            return Err(not_ready(format!("signaling state is {:?}", signaling)));
        }
        let state = self.state();
        if state != SessionState::Idle {
            return Err(not_ready(format!("session is {:?}", state)));
        }
        if self
            .inner
            .negotiating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(not_ready("call setup already in flight"));
        }
        Ok(connection)
    }

    /// Undo a failed call setup so the orchestrator can retry
    async fn abandon_setup(&self, core: &mut SessionCore, connection: &Arc<dyn PeerConnection>) {
        if let Err(e) = connection.rollback().await {
            warn!("Rollback after failed negotiation failed: {}", e);
        }
        core.peer_id = None;
        core.remote_description_set = false;
        core.pending_candidates.clear();
        core.pending_outbound.clear();
        self.set_channel_status(core, DataChannelStatus::Closed);
        self.transition(SessionState::Idle);
        self.inner.negotiating.store(false, Ordering::Release);
    }

    fn add_local_tracks(&self, core: &SessionCore, connection: &Arc<dyn PeerConnection>) -> Result<()> {
        for track in core.local_tracks() {
            connection.add_track(track)?;
        }
        Ok(())
    }

    /// Offer a call to `target_id`.
    ///
    /// Requires an open session in the stable, idle pre-call state and no
    /// other call setup in flight; otherwise fails with `NotReady` without
    /// touching the session.
    pub async fn start_call(
        &self,
        target_id: &str,
        stream: Option<MediaStream>,
        metadata: CallMetadata,
    ) -> Result<()> {
        let mut core = self.lock_core().await;
        let connection = self.claim_call_setup(&core)?;
        let Some(self_id) = core.self_id.clone() else {
            self.inner.negotiating.store(false, Ordering::Release);
            return Err(not_ready("session has no identity"));
        };

        // A passed stream replaces the attached one only once the offer is
        // in place
        let tracks = match &stream {
            Some(stream) => stream.tracks().to_vec(),
            None => core.local_tracks(),
        };
        for track in tracks {
            if let Err(e) = connection.add_track(track) {
                discard_stream(stream);
                self.abandon_setup(&mut core, &connection).await;
                return Err(e.into());
            }
        }

        if core.data_channel.is_none() {
            match connection
                .create_data_channel(&self.inner.data_channel_label)
                .await
            {
                Ok(_) => self.set_channel_status(&mut core, DataChannelStatus::Connecting),
                Err(e) => warn!("Continuing without data channel: {}", e),
            }
        }

        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                discard_stream(stream);
                self.abandon_setup(&mut core, &connection).await;
                return Err(negotiation(e));
            }
        };
        if let Err(e) = connection.set_local_description(offer.clone()).await {
            discard_stream(stream);
            self.abandon_setup(&mut core, &connection).await;
            return Err(negotiation(e));
        }

        if let Some(stream) = stream {
            core.replace_local_stream(stream);
        }
        self.transition(SessionState::Negotiating(Role::Caller));
        core.peer_id = Some(target_id.to_string());

        let signal = OutboundSignal::CallUser {
            to: target_id.to_string(),
            from: self_id,
            offer,
            metadata,
        };
        if let Err(e) = self.inner.signaling.send(signal).await {
            warn!("Offer to {} could not be delivered: {}", target_id, e);
            self.abandon_setup(&mut core, &connection).await;
            return Err(e.into());
        }

        info!("Offer sent to {}", target_id);
        self.flush_outbound_candidates(&mut core).await;
        Ok(())
    }

    /// Answer an offer from `from`.
    ///
    /// `local_stream` may be absent; an already attached stream is used
    /// then, and with neither the session runs audio/text-only.
    /// `on_remote` fires once with the remote stream on its first track.
    pub async fn handle_incoming_offer(
        &self,
        from: &str,
        offer: SessionDescription,
        local_stream: Option<MediaStream>,
        on_remote: Option<RemoteStreamHandler>,
    ) -> Result<()> {
        let mut core = self.lock_core().await;
        let connection = self.claim_call_setup(&core)?;
        let Some(self_id) = core.self_id.clone() else {
            self.inner.negotiating.store(false, Ordering::Release);
            return Err(not_ready("session has no identity"));
        };

        if let Err(e) = connection.set_remote_description(offer).await {
            warn!("Rejected offer from {}: {}", from, e);
            self.abandon_setup(&mut core, &connection).await;
            return Err(negotiation(e));
        }
        self.transition(SessionState::Negotiating(Role::Callee));
        core.peer_id = Some(from.to_string());
        core.remote_description_set = true;
        self.flush_pending_candidates(&mut core, from).await;

        if let Some(stream) = local_stream {
            core.replace_local_stream(stream);
        }
        if core.local_stream.is_none() {
            info!("Answering {} without local media", from);
        }
        if let Err(e) = self.add_local_tracks(&core, &connection) {
            self.abandon_setup(&mut core, &connection).await;
            return Err(e);
        }

        if on_remote.is_some() {
            core.on_remote = on_remote;
        }

        let answer = match connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                self.abandon_setup(&mut core, &connection).await;
                return Err(negotiation(e));
            }
        };
        if let Err(e) = connection.set_local_description(answer.clone()).await {
            self.abandon_setup(&mut core, &connection).await;
            return Err(negotiation(e));
        }

        let signal = OutboundSignal::MakeAnswer {
            to: from.to_string(),
            from: self_id,
            answer,
        };
        if let Err(e) = self.inner.signaling.send(signal).await {
            // The answer is already applied locally, so there is no prior
            // state to return to.
            warn!("Answer to {} could not be delivered: {}", from, e);
            self.transition(SessionState::Failed);
            return Err(e.into());
        }

        info!("Answer sent to {}", from);
        self.flush_outbound_candidates(&mut core).await;
        Ok(())
    }

    /// Apply the callee's answer to a pending offer
    pub async fn handle_answer(&self, answer: SessionDescription) -> Result<()> {
        let mut core = self.lock_core().await;
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        let state = self.state();
        if state != SessionState::Negotiating(Role::Caller) {
            return Err(SessionError::InvalidState {
                state: format!("{:?}", state),
                operation: "handle_answer".to_string(),
            }
            .into());
        }
        let Some(connection) = core.connection.clone() else {
            return Err(not_ready("peer session is not open"));
        };

        connection
            .set_remote_description(answer)
            .await
            .map_err(negotiation)?;
        core.remote_description_set = true;
        debug!("Applied remote answer");
        if let Some(peer) = core.peer_id.clone() {
            self.flush_pending_candidates(&mut core, &peer).await;
        }
        Ok(())
    }

    /// Apply a candidate sent by `from`, or buffer it until the remote
    /// description is set. Candidates arriving after close, or from anyone
    /// but the current peer, are dropped.
    pub async fn add_remote_candidate(&self, from: &str, candidate: IceCandidate) -> Result<()> {
        let mut core = self.lock_core().await;
        if self.is_closed() {
            debug!("Dropping ICE candidate for closed session");
            return Ok(());
        }
        if let Some(peer) = core.peer_id.as_deref() {
            if peer != from {
                debug!("Dropping ICE candidate from {}, peer is {}", from, peer);
                return Ok(());
            }
        }

        let connection = match core.connection.clone() {
            Some(connection) if core.remote_description_set => connection,
            _ => {
                core.pending_candidates.push_back((from.to_string(), candidate));
                debug!(
                    "Buffered ICE candidate ({} pending)",
                    core.pending_candidates.len()
                );
                return Ok(());
            }
        };

        connection
            .add_ice_candidate(candidate)
            .await
            .map_err(negotiation)
    }

    /// Number of inbound candidates waiting for the remote description
    pub async fn pending_candidate_count(&self) -> usize {
        self.lock_core().await.pending_candidates.len()
    }
}
