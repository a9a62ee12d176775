//! JSON bodies exchanged with the rendezvous and wake-notification backends.
//! Field names are fixed by the deployed services.

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const REGISTER_PATH: &str = "/registrar";
pub const ONLINE_PATH: &str = "/verificar-online";
pub const WANTED_PATH: &str = "/verificar";
pub const CALL_REQUEST_PATH: &str = "/procurar";
pub const UNREGISTER_PATH: &str = "/desregistrar";
pub const TOKEN_PATH: &str = "/registrar-token";
pub const NOTIFY_PATH: &str = "/send-notification";

/// Status sent with every registration
pub const STATUS_ONLINE: &str = "online";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub status: String,
    pub timestamp: i64,
}

impl RegisterRequest {
    pub fn online(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: STATUS_ONLINE.to_string(),
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineResponse {
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantedResponse {
    #[serde(default)]
    pub procurado: bool,
    #[serde(rename = "callerId", default)]
    pub caller_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequestBody {
    pub caller_id: String,
    pub target_id: String,
    pub caller_lang: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRegistrationBody {
    pub receiver_id: String,
    pub fcm_token: String,
    pub tipo: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub caller_id: String,
    pub caller_lang: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBody {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

impl CallRequestBody {
    pub fn new(caller_id: &str, target_id: &str, caller_lang: &str) -> Self {
        Self {
            caller_id: caller_id.to_string(),
            target_id: target_id.to_string(),
            caller_lang: caller_lang.to_string(),
            timestamp: now_millis(),
        }
    }
}

impl TokenRegistrationBody {
    pub fn new(receiver_id: &str, token: &str, kind: &str) -> Self {
        Self {
            receiver_id: receiver_id.to_string(),
            fcm_token: token.to_string(),
            tipo: kind.to_string(),
            timestamp: now_millis(),
        }
    }
}
