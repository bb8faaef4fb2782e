//! Configuration for the voice ordering gateway.
//!
//! All runtime settings come from the environment (`VOICE_ORDER_*` variables),
//! with serde defaults for everything that has a sensible development value.

pub mod prompts;
pub mod settings;

pub use settings::{
    ModelConfig, PersistenceConfig, RestaurantConfig, ServerConfig, Settings, TelephonyConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
