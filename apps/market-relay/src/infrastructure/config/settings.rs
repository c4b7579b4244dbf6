//! Relay Configuration Settings
//!
//! Configuration types for the market relay, loaded from environment variables.

use crate::application::services::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CLOSE_REASON, DEFAULT_MAX_FRAME_BYTES, DEFAULT_QUEUE_LIMIT,
};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Production deployment.
    Production,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    /// Check if this is the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// WebSocket server port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 4002,
            health_port: 8083,
        }
    }
}

/// Market view cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum cached views.
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Per-connection delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Pending messages per connection before the oldest are dropped.
    pub queue_limit: usize,
    /// Largest WebSocket frame payload.
    pub max_frame_bytes: usize,
    /// Reason sent with the close handshake.
    pub close_reason: String,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_limit: DEFAULT_QUEUE_LIMIT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Server port settings.
    pub server: ServerSettings,
    /// View cache settings.
    pub cache: CacheSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a size setting is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a size setting is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = lookup("MARKET_RELAY_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server = ServerSettings {
            ws_port: parse_or(&lookup, "MARKET_RELAY_WS_PORT", ServerSettings::default().ws_port),
            health_port: parse_or(
                &lookup,
                "MARKET_RELAY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let cache = CacheSettings {
            capacity: non_zero(
                "MARKET_RELAY_CACHE_CAPACITY",
                parse_or(&lookup, "MARKET_RELAY_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            )?,
        };

        let delivery = DeliverySettings {
            queue_limit: non_zero(
                "MARKET_RELAY_QUEUE_LIMIT",
                parse_or(&lookup, "MARKET_RELAY_QUEUE_LIMIT", DEFAULT_QUEUE_LIMIT),
            )?,
            max_frame_bytes: non_zero(
                "MARKET_RELAY_MAX_FRAME_BYTES",
                parse_or(&lookup, "MARKET_RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES),
            )?,
            close_reason: lookup("MARKET_RELAY_CLOSE_REASON")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string()),
        };

        Ok(Self {
            environment,
            server,
            cache,
            delivery,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value the relay cannot run with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_zero(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

// =============================================================================
// Tests
// =============================================================================
