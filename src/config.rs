//! Configuration management for partner-hub.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so a missing or partial file is never fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_base: String,
    pub api_key_env: String,
    pub model: String,
    pub voice: String,
    pub sample_rate: u32,
    pub paragraph_pause_ms: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub default_language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Kore".into(),
            sample_rate: 24000,
            paragraph_pause_ms: 800,
            request_timeout_secs: 30,
            poll_interval_ms: 50,
            default_language: "es".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub domain: String,
    pub link_path: String,
    pub token_param: String,
    pub legacy_referrer_param: String,
    pub legacy_shop_param: String,
    /// `{slug}` is replaced with the normalized shop slug.
    pub shop_url_template: String,
    pub default_shop_url: String,
    pub default_language: String,
    pub fallback_name: String,
    /// Known founder ids and their display names.
    pub founders: HashMap<String, String>,
    pub session_key: String,
    pub webhook_url: Option<String>,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            domain: "partners.example.com".into(),
            link_path: "jose".into(),
            token_param: "sync".into(),
            legacy_referrer_param: "ref".into(),
            legacy_shop_param: "shop".into(),
            shop_url_template: "https://shop.example.com/{slug}".into(),
            default_shop_url: "https://shop.example.com".into(),
            default_language: "es".into(),
            fallback_name: "Socio Independiente".into(),
            founders: HashMap::from([("067-2922111".to_string(), "José".to_string())]),
            session_key: "partner_hub_referral".into(),
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            path: base.join("partner-hub/session.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub referral: ReferralConfig,
    pub session: SessionConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./partner-hub.yaml
    /// 2. ~/.config/partner-hub/config.yaml
    /// 3. /etc/partner-hub/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("partner-hub.yaml")),
                dirs::home_dir().map(|h| h.join(".config/partner-hub/config.yaml")),
                Some(PathBuf::from("/etc/partner-hub/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
