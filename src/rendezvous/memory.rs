use super::wire::{CALL_REQUEST_PATH, ONLINE_PATH, REGISTER_PATH, TOKEN_PATH, WANTED_PATH};
use super::{CallRequest, PushCredential, RendezvousService, WakeNotification, WakeNotifier, WantedStatus};
use crate::error::SignalingError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// In-process rendezvous service and wake backend.
///
/// Behaves like the deployed services for a single process and can be told
/// to fail individual operations.
#[derive(Clone)]
pub struct InMemoryRendezvous {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    wakes: broadcast::Sender<WakeNotification>,
    fail_register: AtomicBool,
    fail_lookups: AtomicBool,
    fail_token_registration: AtomicBool,
    fail_wake: AtomicBool,
    online_checks: AtomicUsize,
}

#[derive(Default)]
struct State {
    online: HashSet<String>,
    /// target id -> waiting caller id
    wanted: HashMap<String, String>,
    tokens: HashMap<String, PushCredential>,
    sent_wakes: Vec<WakeNotification>,
    call_requests: Vec<CallRequest>,
}

fn outage(endpoint: &str) -> SignalingError {
    SignalingError::Request {
        endpoint: endpoint.to_string(),
        details: "service unavailable".to_string(),
    }
}

impl InMemoryRendezvous {
    pub fn new() -> Self {
        let (wakes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                wakes,
                fail_register: AtomicBool::new(false),
                fail_lookups: AtomicBool::new(false),
                fail_token_registration: AtomicBool::new(false),
                fail_wake: AtomicBool::new(false),
                online_checks: AtomicUsize::new(0),
            }),
        }
    }

    /// Wake notifications as they are delivered, for whoever plays the
    /// receiving device
    pub fn subscribe_wakes(&self) -> broadcast::Receiver<WakeNotification> {
        self.inner.wakes.subscribe()
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.inner.fail_register.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.inner.fail_lookups.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_token_registration(&self, fail: bool) {
        self.inner.fail_token_registration.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_wake(&self, fail: bool) {
        self.inner.fail_wake.store(fail, Ordering::Relaxed);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.state.lock().online.contains(id)
    }

    pub fn registered_token(&self, receiver_id: &str) -> Option<PushCredential> {
        self.inner.state.lock().tokens.get(receiver_id).cloned()
    }

    pub fn sent_wakes(&self) -> Vec<WakeNotification> {
        self.inner.state.lock().sent_wakes.clone()
    }

    pub fn call_requests(&self) -> Vec<CallRequest> {
        self.inner.state.lock().call_requests.clone()
    }

    /// Number of online checks served so far
    pub fn online_checks(&self) -> usize {
        self.inner.online_checks.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RendezvousService for InMemoryRendezvous {
    async fn register(&self, id: &str) -> Result<(), SignalingError> {
        if self.inner.fail_register.load(Ordering::Relaxed) {
            return Err(outage(REGISTER_PATH));
        }
        self.inner.state.lock().online.insert(id.to_string());
        info!("Registered {} as online", id);
        Ok(())
    }

    async fn is_online(&self, id: &str) -> Result<bool, SignalingError> {
        self.inner.online_checks.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_lookups.load(Ordering::Relaxed) {
            return Err(outage(ONLINE_PATH));
        }
        Ok(self.inner.state.lock().online.contains(id))
    }

    async fn check_wanted(&self, id: &str) -> Result<WantedStatus, SignalingError> {
        if self.inner.fail_lookups.load(Ordering::Relaxed) {
            return Err(outage(WANTED_PATH));
        }
        let caller_id = self.inner.state.lock().wanted.get(id).cloned();
        Ok(WantedStatus {
            wanted: caller_id.is_some(),
            caller_id,
        })
    }

    async fn request_call(&self, request: &CallRequest) -> Result<(), SignalingError> {
        if self.inner.fail_lookups.load(Ordering::Relaxed) {
            return Err(outage(CALL_REQUEST_PATH));
        }
        let mut state = self.inner.state.lock();
        state
            .wanted
            .insert(request.target_id.clone(), request.caller_id.clone());
        state.call_requests.push(request.clone());
        debug!("{} is looking for {}", request.caller_id, request.target_id);
        Ok(())
    }

    async fn unregister(&self, id: &str) -> Result<(), SignalingError> {
        let mut state = self.inner.state.lock();
        state.online.remove(id);
        state.wanted.remove(id);
        info!("Unregistered {}", id);
        Ok(())
    }
}

#[async_trait]
impl WakeNotifier for InMemoryRendezvous {
    async fn register_token(
        &self,
        receiver_id: &str,
        credential: &PushCredential,
    ) -> Result<(), SignalingError> {
        if self.inner.fail_token_registration.load(Ordering::Relaxed) {
            return Err(outage(TOKEN_PATH));
        }
        self.inner
            .state
            .lock()
            .tokens
            .insert(receiver_id.to_string(), credential.clone());
        debug!("Stored {} push credential for {}", credential.kind, receiver_id);
        Ok(())
    }

    async fn send_wake(&self, notification: &WakeNotification) -> Result<(), SignalingError> {
        if self.inner.fail_wake.load(Ordering::Relaxed) {
            return Err(SignalingError::WakeFailed {
                details: "wake backend unavailable".to_string(),
            });
        }

        {
            let mut state = self.inner.state.lock();
            let known = state.tokens.values().any(|c| c.token == notification.token);
            if !known {
                warn!("Wake requested for unknown token");
                return Err(SignalingError::WakeFailed {
                    details: "push token is not registered".to_string(),
                });
            }
            state.sent_wakes.push(notification.clone());
        }

        let listeners = self.inner.wakes.send(notification.clone()).unwrap_or(0);
        info!(
            "Wake notification for {} delivered to {} listeners",
            notification.receiver_id, listeners
        );
        Ok(())
    }
}
