//! Runtime settings.
//!
//! Loaded from the environment with the `VOICE_ORDER_` prefix and `__` as the
//! section separator, e.g. `VOICE_ORDER_SERVER__PORT=9000` or
//! `VOICE_ORDER_MODEL__API_KEY=...`.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP/WebSocket listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Generative speech service
    #[serde(default)]
    pub model: ModelConfig,

    /// Telephony provider REST credentials
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// Restaurant identity
    #[serde(default)]
    pub restaurant: RestaurantConfig,

    /// Store configuration (ScyllaDB)
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible host for the media stream URL. Empty means use the
    /// Host header of the incoming webhook request.
    #[serde(default)]
    pub public_host: String,

    /// Grace period before a forced exit on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_host: String::new(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Generative speech service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API key, also read from `MODEL_API_KEY`
    #[serde(default = "default_model_api_key")]
    pub api_key: String,

    /// Bidirectional streaming endpoint
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Named voice for synthesized speech
    #[serde(default = "default_voice")]
    pub voice: String,
}

fn default_model_api_key() -> String {
    std::env::var("MODEL_API_KEY").unwrap_or_default()
}

fn default_model_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

fn default_model_id() -> String {
    "models/gemini-2.0-flash-live-001".to_string()
}

fn default_voice() -> String {
    "Aoede".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: default_model_api_key(),
            endpoint: default_model_endpoint(),
            model_id: default_model_id(),
            voice: default_voice(),
        }
    }
}

/// Telephony provider REST configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Account SID, also read from `TELEPHONY_ACCOUNT_SID`
    #[serde(default = "default_account_sid")]
    pub account_sid: String,

    /// Auth token, also read from `TELEPHONY_AUTH_TOKEN`
    #[serde(default = "default_auth_token")]
    pub auth_token: String,

    /// REST API base
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_account_sid() -> String {
    std::env::var("TELEPHONY_ACCOUNT_SID").unwrap_or_default()
}

fn default_auth_token() -> String {
    std::env::var("TELEPHONY_AUTH_TOKEN").unwrap_or_default()
}

fn default_api_base() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: default_account_sid(),
            auth_token: default_auth_token(),
            api_base: default_api_base(),
        }
    }
}

/// Restaurant identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantConfig {
    /// Store-side restaurant identifier
    #[serde(default = "default_restaurant_id")]
    pub id: String,

    /// Display name, used in the greeting
    #[serde(default = "default_restaurant_name")]
    pub name: String,

    /// E.164 number that escalated calls are dialed to
    #[serde(default = "default_transfer_number")]
    pub transfer_number: String,
}

fn default_restaurant_id() -> String {
    std::env::var("RESTAURANT_ID").unwrap_or_else(|_| "spice-bazaar-irvine".to_string())
}

fn default_restaurant_name() -> String {
    "Spice Bazaar Irvine".to_string()
}

fn default_transfer_number() -> String {
    std::env::var("RESTAURANT_TRANSFER_NUMBER").unwrap_or_default()
}

impl Default for RestaurantConfig {
    fn default() -> Self {
        Self {
            id: default_restaurant_id(),
            name: default_restaurant_name(),
            transfer_number: default_transfer_number(),
        }
    }
}

/// Store configuration (ScyllaDB)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable the database-backed store (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,

    /// Host addresses
    #[serde(default = "default_store_hosts")]
    pub hosts: Vec<String>,

    /// Keyspace name
    #[serde(default = "default_store_keyspace")]
    pub keyspace: String,

    /// Replication factor
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_store_hosts() -> Vec<String> {
    std::env::var("STORE_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_store_keyspace() -> String {
    std::env::var("STORE_KEYSPACE").unwrap_or_else(|_| "voice_order".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: default_store_hosts(),
            keyspace: default_store_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

impl Settings {
    /// Load settings from the environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("VOICE_ORDER").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate settings for a production run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.api_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "model.api_key".to_string(),
                message: "model API key is required".to_string(),
            });
        }

        if self.telephony.account_sid.is_empty() || self.telephony.auth_token.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "telephony".to_string(),
                message: "account SID and auth token are required".to_string(),
            });
        }

        if self.restaurant.transfer_number.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "restaurant.transfer_number".to_string(),
                message: "transfer number is required for escalation".to_string(),
            });
        }

        Ok(())
    }
}
