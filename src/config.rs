use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable consulted when no credential is configured
pub const FALLBACK_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnapcoachConfig {
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    pub camera: CameraConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    /// IP address to bind to
    #[serde(default = "default_relay_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Largest accepted request body (data-URL images are large)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    /// Provider credential; absence is reported per request, not at load
    #[serde(default)]
    pub api_key: Option<String>,

    /// Chat-completions endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Generated-token ceiling per analysis
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Image detail hint: low, high or auto
    #[serde(default = "default_image_detail")]
    pub image_detail: String,

    /// Fixed instruction sent alongside every image
    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Preferred facing mode ("user" or "environment")
    #[serde(default = "default_facing")]
    pub facing: String,

    /// Preferred resolution (width, height); the device may pick another
    #[serde(default = "default_ideal_resolution")]
    pub ideal_resolution: (u32, u32),

    /// JPEG quality for captured frames (80 = 0.8)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Video device used by the GStreamer backend
    #[serde(default = "default_device")]
    pub device: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Full URL of the relay's analyze route
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
}

impl UpstreamConfig {
    /// Credential if one is set and non-blank
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl SnapcoachConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("snapcoach.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("relay.ip", default_relay_ip())?
            .set_default("relay.port", default_relay_port() as i64)?
            .set_default("relay.max_body_bytes", default_max_body_bytes() as i64)?
            .set_default("upstream.endpoint", default_endpoint())?
            .set_default("upstream.model", default_model())?
            .set_default("upstream.max_tokens", default_max_tokens() as i64)?
            .set_default("upstream.image_detail", default_image_detail())?
            .set_default("upstream.prompt", default_prompt())?
            .set_default("upstream.timeout_seconds", default_timeout_seconds() as i64)?
            .set_default("camera.facing", default_facing())?
            .set_default(
                "camera.ideal_resolution",
                vec![
                    default_ideal_resolution().0 as i64,
                    default_ideal_resolution().1 as i64,
                ],
            )?
            .set_default("camera.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("camera.device", default_device())?
            .set_default("client.relay_url", default_relay_url())?
            .add_source(File::with_name(&path_str).required(false))
            // SNAPCOACH_UPSTREAM__API_KEY, SNAPCOACH_RELAY__PORT, ...
            .add_source(
                Environment::with_prefix("SNAPCOACH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: SnapcoachConfig = settings.try_deserialize()?;

        if config.upstream.credential().is_none() {
            if let Ok(key) = std::env::var(FALLBACK_API_KEY_ENV) {
                debug!("Using upstream credential from {}", FALLBACK_API_KEY_ENV);
                config.upstream.api_key = Some(key);
            }
        }

        info!("Configuration loaded successfully");
        debug!(
            "Relay {}:{}, model {}, credential configured: {}",
            config.relay.ip,
            config.relay.port,
            config.upstream.model,
            config.upstream.credential().is_some()
        );

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.port == 0 {
            return Err(ConfigError::Message(
                "Relay port must be greater than 0".to_string(),
            ));
        }

        if self.relay.max_body_bytes == 0 {
            return Err(ConfigError::Message(
                "Relay max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if self.upstream.max_tokens == 0 {
            return Err(ConfigError::Message(
                "Upstream max_tokens must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.upstream.image_detail.as_str(), "low" | "high" | "auto") {
            return Err(ConfigError::Message(format!(
                "Upstream image_detail must be low, high or auto (got '{}')",
                self.upstream.image_detail
            )));
        }

        if self.camera.ideal_resolution.0 == 0 || self.camera.ideal_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(ConfigError::Message(
                "Camera jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML, with the credential blanked out
    pub fn to_toml_redacted(&self) -> Result<String, toml::ser::Error> {
        let mut redacted = self.clone();
        redacted.upstream.api_key = None;
        toml::to_string_pretty(&redacted)
    }
}

impl Default for SnapcoachConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig {
                ip: default_relay_ip(),
                port: default_relay_port(),
                max_body_bytes: default_max_body_bytes(),
            },
            upstream: UpstreamConfig {
                api_key: None,
                endpoint: default_endpoint(),
                model: default_model(),
                max_tokens: default_max_tokens(),
                image_detail: default_image_detail(),
                prompt: default_prompt(),
                timeout_seconds: default_timeout_seconds(),
            },
            camera: CameraConfig {
                facing: default_facing(),
                ideal_resolution: default_ideal_resolution(),
                jpeg_quality: default_jpeg_quality(),
                device: default_device(),
            },
            client: ClientConfig {
                relay_url: default_relay_url(),
            },
        }
    }
}

// Default value functions
fn default_relay_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_relay_port() -> u16 {
    3000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_image_detail() -> String {
    "high".to_string()
}
fn default_prompt() -> String {
    "Analyze this image as an interview question and answer it as if you were \
     the candidate giving the interview."
        .to_string()
}
fn default_timeout_seconds() -> u64 {
    120
}

fn default_facing() -> String {
    "user".to_string()
}
fn default_ideal_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_device() -> String {
    "/dev/video0".to_string()
}

fn default_relay_url() -> String {
    "http://127.0.0.1:3000/api/analyze".to_string()
}
