//! Layered application configuration
//!
//! Sources, later ones winning: built-in defaults, `config/default.toml`,
//! `config/{ENVIRONMENT}.toml`, then `DPO_RETURN__SECTION__KEY` environment
//! variables. A `.env` file is loaded first when present.

use crate::codec::{CodecError, ParamCodec};
use crate::logging::Environment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_PREFIX: &str = "DPO_RETURN";
pub const ENV_SEPARATOR: &str = "__";
/// Routes mounted next to the configurable return path.
pub const HEALTH_PATH: &str = "/health";
pub const CHECKOUT_PATH: &str = "/payments/{order_id}/checkout";
pub const DEFAULT_CONFIRMATION: &str =
    "Thanks for contacting us! We will get in touch with you shortly.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid codec keys: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub codec: CodecConfig,
    pub gateway: GatewayConfig,
    pub poller: PollerConfig,
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL; return URLs are built from it.
    pub public_base_url: String,
    /// Optional JSON file with feeds and orders loaded into the in-memory stores.
    pub seed_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
            seed_file: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Hex-encoded 32-byte key for return-parameter encryption.
    pub encryption_key: String,
    pub hash_secret: String,
}

impl std::fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecConfig")
            .field("encryption_key", &"[REDACTED]")
            .field("hash_secret", &"[REDACTED]")
            .finish()
    }
}

impl CodecConfig {
    pub fn build(&self) -> Result<ParamCodec, CodecError> {
        ParamCodec::from_secrets(&self.encryption_key, &self.hash_secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub live_base_url: String,
    pub sandbox_base_url: String,
    pub api_path: String,
    pub pay_path: String,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            live_base_url: "https://secure.3gdirectpay.com".to_string(),
            sandbox_base_url: "https://secure1.sandbox.directpay.online".to_string(),
            api_path: "/API/v6/".to_string(),
            pay_path: "/payv2.php".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 2_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Honour `mode=on&test_itn=1` callbacks without a valid hash.
    pub allow_test_bypass: bool,
    pub return_path: String,
    pub default_confirmation: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            allow_test_bypass: false,
            return_path: "/payments/return".to_string(),
            default_confirmation: DEFAULT_CONFIRMATION.to_string(),
        }
    }
}

impl AppConfig {
    /// Load from files and environment, then validate for the detected
    /// deployment environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let environment = Environment::from_env();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::File::with_name(&format!("config/{}", environment.as_str()))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate(environment)?;
        Ok(cfg)
    }

    pub fn validate(&self, environment: Environment) -> Result<(), ConfigError> {
        self.codec.build()?;

        if self.poller.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "poller.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poller.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "poller.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.gateway.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if reqwest::Url::parse(&self.server.public_base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.public_base_url {:?} is not an absolute URL",
                self.server.public_base_url
            )));
        }
        if !self.callback.return_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "callback.return_path must start with '/'".to_string(),
            ));
        }
        if return_path_collides(&self.callback.return_path) {
            return Err(ConfigError::Invalid(format!(
                "callback.return_path {:?} overlaps a built-in route",
                self.callback.return_path
            )));
        }
        if environment.is_production() && self.callback.allow_test_bypass {
            return Err(ConfigError::Invalid(
                "callback.allow_test_bypass cannot be enabled in production".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL the gateway sends the customer back to.
    pub fn return_base_url(&self) -> String {
        format!(
            "{}{}",
            self.server.public_base_url.trim_end_matches('/'),
            self.callback.return_path
        )
    }
}

/// True when `path` would clash with [`HEALTH_PATH`] or [`CHECKOUT_PATH`]
/// in the router, or is not a literal path.
fn return_path_collides(path: &str) -> bool {
    if path.contains(|c| matches!(c, '{' | '}' | '*')) {
        return true;
    }
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').skip(1).collect();
    let health: Vec<&str> = HEALTH_PATH.split('/').skip(1).collect();
    let checkout: Vec<&str> = CHECKOUT_PATH.split('/').skip(1).collect();

    segments.is_empty()
        || segments == health
        || (segments.len() == checkout.len()
            && segments[0] == checkout[0]
            && segments[2] == checkout[2])
}
