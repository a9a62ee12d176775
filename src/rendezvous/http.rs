use super::wire::{
    CallRequestBody, OnlineResponse, RegisterRequest, SuccessResponse, TokenRegistrationBody,
    UnregisterRequest, WantedResponse, CALL_REQUEST_PATH, NOTIFY_PATH, ONLINE_PATH, REGISTER_PATH,
    TOKEN_PATH, UNREGISTER_PATH, WANTED_PATH,
};
use super::{CallRequest, PushCredential, RendezvousService, WakeNotification, WakeNotifier, WantedStatus};
use crate::config::RendezvousConfig;
use crate::error::{PeerlinkError, SignalingError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// REST/JSON client for the rendezvous service and the wake backend
#[derive(Debug, Clone)]
pub struct HttpRendezvousClient {
    http: Client,
    base_url: String,
    wake_url: String,
}

impl HttpRendezvousClient {
    pub fn new(config: &RendezvousConfig) -> Result<Self, PeerlinkError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PeerlinkError::component("rendezvous", format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            wake_url: config.wake_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SignalingError> {
        let url = Self::url(&self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(path, e))?;
        decode(path, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        body: &B,
    ) -> Result<T, SignalingError> {
        let url = Self::url(base, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(path, e))?;
        decode(path, response).await
    }

    fn ensure_success(path: &str, response: SuccessResponse) -> Result<(), SignalingError> {
        if response.success {
            Ok(())
        } else {
            Err(SignalingError::Request {
                endpoint: path.to_string(),
                details: "service reported failure".to_string(),
            })
        }
    }
}

fn request_error(path: &str, error: reqwest::Error) -> SignalingError {
    SignalingError::Request {
        endpoint: path.to_string(),
        details: error.to_string(),
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T, SignalingError> {
    let status = response.status();
    if !status.is_success() {
        warn!("{} returned HTTP {}", path, status);
        return Err(SignalingError::Status {
            endpoint: path.to_string(),
            status: status.as_u16(),
        });
    }
    response.json::<T>().await.map_err(|e| SignalingError::Decode {
        endpoint: path.to_string(),
        details: e.to_string(),
    })
}

#[async_trait]
impl RendezvousService for HttpRendezvousClient {
    async fn register(&self, id: &str) -> Result<(), SignalingError> {
        let response: SuccessResponse = self
            .post(&self.base_url, REGISTER_PATH, &RegisterRequest::online(id))
            .await?;
        Self::ensure_success(REGISTER_PATH, response)?;
        info!("Registered {} with rendezvous service", id);
        Ok(())
    }

    async fn is_online(&self, id: &str) -> Result<bool, SignalingError> {
        let response: OnlineResponse = self.get(&format!("{}/{}", ONLINE_PATH, id)).await?;
        Ok(response.online)
    }

    async fn check_wanted(&self, id: &str) -> Result<WantedStatus, SignalingError> {
        let response: WantedResponse = self.get(&format!("{}/{}", WANTED_PATH, id)).await?;
        Ok(WantedStatus {
            wanted: response.procurado,
            caller_id: response.caller_id,
        })
    }

    async fn request_call(&self, request: &CallRequest) -> Result<(), SignalingError> {
        let body = CallRequestBody::new(&request.caller_id, &request.target_id, &request.caller_lang);
        let response: SuccessResponse = self.post(&self.base_url, CALL_REQUEST_PATH, &body).await?;
        Self::ensure_success(CALL_REQUEST_PATH, response)
    }

    async fn unregister(&self, id: &str) -> Result<(), SignalingError> {
        let body = UnregisterRequest { id: id.to_string() };
        let response: SuccessResponse = self.post(&self.base_url, UNREGISTER_PATH, &body).await?;
        Self::ensure_success(UNREGISTER_PATH, response)?;
        info!("Unregistered {} from rendezvous service", id);
        Ok(())
    }
}

#[async_trait]
impl WakeNotifier for HttpRendezvousClient {
    async fn register_token(
        &self,
        receiver_id: &str,
        credential: &PushCredential,
    ) -> Result<(), SignalingError> {
        let body = TokenRegistrationBody::new(receiver_id, &credential.token, &credential.kind);
        let response: SuccessResponse = self.post(&self.wake_url, TOKEN_PATH, &body).await?;
        Self::ensure_success(TOKEN_PATH, response)
    }

    async fn send_wake(&self, notification: &WakeNotification) -> Result<(), SignalingError> {
        let response: SuccessResponse = self
            .post(&self.wake_url, NOTIFY_PATH, &notification.to_wire())
            .await
            .map_err(|e| SignalingError::WakeFailed {
                details: e.to_string(),
            })?;
        if !response.success {
            return Err(SignalingError::WakeFailed {
                details: "wake backend reported failure".to_string(),
            });
        }
        info!("Wake notification sent to {}", notification.receiver_id);
        Ok(())
    }
}
