use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PeerlinkConfig {
    pub ice: IceConfig,
    pub rendezvous: RendezvousConfig,
    pub devices: DevicesConfig,
    pub health: HealthConfig,
    pub call: CallConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IceConfig {
    /// Ordered reflection/relay servers handed to the peer connection
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<IceServer>,
}

/// A STUN or TURN server entry
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RendezvousConfig {
    /// Base URL of the rendezvous (registration/discovery) service
    #[serde(default = "default_rendezvous_url")]
    pub base_url: String,

    /// Base URL of the push wake-notification backend
    #[serde(default = "default_wake_url")]
    pub wake_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DevicesConfig {
    /// How long an enumerated device snapshot stays valid
    #[serde(default = "default_cache_validity")]
    pub cache_validity_seconds: u64,

    /// Delay between stopping a track and acquiring its replacement
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Device labels exposed by the virtual capture backend
    #[serde(default = "default_virtual_labels")]
    pub virtual_labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// No playback activity for longer than this marks the capture as frozen
    #[serde(default = "default_freeze_threshold")]
    pub freeze_threshold_seconds: u64,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CallConfig {
    /// Interval between receiver-online polls after a wake notification
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Language code announced to the remote side
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl DevicesConfig {
    pub fn cache_validity(&self) -> Duration {
        Duration::from_secs(self.cache_validity_seconds)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn freeze_threshold(&self) -> Duration {
        Duration::from_secs(self.freeze_threshold_seconds)
    }
}

impl CallConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl RendezvousConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl PeerlinkConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("peerlink.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let ice_servers: Vec<config::Value> = default_ice_servers()
            .into_iter()
            .map(|server| {
                let mut table = config::Map::new();
                table.insert("urls".to_string(), config::Value::from(server.urls));
                config::Value::from(table)
            })
            .collect();

        let settings = Config::builder()
            .set_default("ice.servers", ice_servers)?
            .set_default("rendezvous.base_url", default_rendezvous_url())?
            .set_default("rendezvous.wake_url", default_wake_url())?
            .set_default(
                "rendezvous.request_timeout_seconds",
                default_request_timeout(),
            )?
            .set_default("devices.cache_validity_seconds", default_cache_validity())?
            .set_default("devices.settle_delay_ms", default_settle_delay())?
            .set_default("devices.virtual_labels", default_virtual_labels())?
            .set_default("health.check_interval_seconds", default_check_interval())?
            .set_default(
                "health.freeze_threshold_seconds",
                default_freeze_threshold(),
            )?
            .set_default(
                "health.max_recovery_attempts",
                default_max_recovery_attempts(),
            )?
            .set_default("call.poll_interval_seconds", default_poll_interval())?
            .set_default("call.language", default_language())?
            .set_default("call.data_channel_label", default_data_channel_label())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with PEERLINK_ prefix
            .add_source(
                Environment::with_prefix("PEERLINK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: PeerlinkConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ice.servers.is_empty() || self.ice.servers.iter().any(|s| s.urls.is_empty()) {
            return Err(ConfigError::Message(
                "At least one ICE server with a URL must be configured".to_string(),
            ));
        }

        if self.rendezvous.base_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Rendezvous base_url must not be empty".to_string(),
            ));
        }

        if self.rendezvous.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Rendezvous request timeout must be greater than 0".to_string(),
            ));
        }

        if self.devices.cache_validity_seconds == 0 {
            return Err(ConfigError::Message(
                "Device cache validity must be greater than 0".to_string(),
            ));
        }

        if !(250..=500).contains(&self.devices.settle_delay_ms) {
            return Err(ConfigError::Message(
                "Device settle delay must be between 250 and 500 ms".to_string(),
            ));
        }

        if self.health.check_interval_seconds == 0 || self.health.freeze_threshold_seconds == 0 {
            return Err(ConfigError::Message(
                "Health check interval and freeze threshold must be greater than 0".to_string(),
            ));
        }

        if self.health.max_recovery_attempts == 0 {
            return Err(ConfigError::Message(
                "Max recovery attempts must be greater than 0".to_string(),
            ));
        }

        if self.call.poll_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Receiver poll interval must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PeerlinkConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig {
                servers: default_ice_servers(),
            },
            rendezvous: RendezvousConfig {
                base_url: default_rendezvous_url(),
                wake_url: default_wake_url(),
                request_timeout_seconds: default_request_timeout(),
            },
            devices: DevicesConfig {
                cache_validity_seconds: default_cache_validity(),
                settle_delay_ms: default_settle_delay(),
                virtual_labels: default_virtual_labels(),
            },
            health: HealthConfig {
                check_interval_seconds: default_check_interval(),
                freeze_threshold_seconds: default_freeze_threshold(),
                max_recovery_attempts: default_max_recovery_attempts(),
            },
            call: CallConfig {
                poll_interval_seconds: default_poll_interval(),
                language: default_language(),
                data_channel_label: default_data_channel_label(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        },
        IceServer {
            urls: vec!["stun:stun1.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        },
    ]
}

fn default_rendezvous_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_wake_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_request_timeout() -> u64 {
    10
}

fn default_cache_validity() -> u64 {
    30
}
fn default_settle_delay() -> u64 {
    300
}
fn default_virtual_labels() -> Vec<String> {
    vec![
        "Front Camera".to_string(),
        "Back Camera".to_string(),
        "Back Ultra Wide Camera".to_string(),
    ]
}

fn default_check_interval() -> u64 {
    5
}
fn default_freeze_threshold() -> u64 {
    10
}
fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_poll_interval() -> u64 {
    3
}
fn default_language() -> String {
    "pt-BR".to_string()
}
fn default_data_channel_label() -> String {
    "translation".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
