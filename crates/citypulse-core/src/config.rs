use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CityPulseError, Result};

/// Top-level configuration for the CityPulse service.
///
/// Loaded from `~/.citypulse/config.toml` by default. Each section corresponds
/// to a stage of the turn pipeline or a cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CityPulseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub maps: MapsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl CityPulseConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CityPulseConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CityPulseError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys: `OPENAI_API_KEY`, `OPENAI_MODEL`, `MAPS_API_KEY`,
    /// `CITYPULSE_PORT`, `CITYPULSE_DATA_DIR`. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.completion.model = model;
        }
        if let Some(key) = get("MAPS_API_KEY") {
            self.maps.api_key = Some(key);
        }
        if let Some(port) = get("CITYPULSE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.general.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid CITYPULSE_PORT"),
            }
        }
        if let Some(dir) = get("CITYPULSE_DATA_DIR") {
            self.general.data_dir = dir;
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the session database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port.
    pub port: u16,
    /// Requests per second accepted on the chat endpoints.
    pub rate_limit_per_sec: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.citypulse/data".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            rate_limit_per_sec: 50,
        }
    }
}

/// Text-completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// API key. When absent the completion collaborator is not configured.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: 30,
        }
    }
}

/// Geocoding and place-search service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Appended to every geocoding query.
    pub region_qualifier: String,
    /// Fallback search centre (Sydney CBD).
    pub default_lat: f64,
    pub default_lng: f64,
    pub timeout_secs: u64,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://maps.googleapis.com".to_string(),
            region_qualifier: "sydney australia".to_string(),
            default_lat: -33.8688,
            default_lng: 151.2093,
            timeout_secs: 15,
        }
    }
}

/// Search radius tiers and result limits. Radii are in metres.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_radius: u32,
    pub suburb_radius: u32,
    pub dense_radius: u32,
    pub broad_radius: u32,
    pub specific_radius: u32,
    /// Inner areas that get `dense_radius` instead of `suburb_radius`.
    pub dense_areas: Vec<String>,
    /// Number of nearby results enriched with a details call and analysed.
    pub places_analyzed: usize,
    /// Number of places described in the composed reply.
    pub places_described: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_radius: 5000,
            suburb_radius: 1500,
            dense_radius: 800,
            broad_radius: 10000,
            specific_radius: 2000,
            dense_areas: [
                "sydney cbd",
                "cbd",
                "the rocks",
                "darlinghurst",
                "haymarket",
                "ultimo",
                "pyrmont",
                "barangaroo",
                "millers point",
                "chippendale",
                "potts point",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            places_analyzed: 5,
            places_described: 4,
        }
    }
}

impl SearchConfig {
    /// Whether a location name is on the dense inner-area allow-list.
    pub fn is_dense_area(&self, location: &str) -> bool {
        let needle = location.trim().to_lowercase();
        self.dense_areas.iter().any(|a| a.to_lowercase() == needle)
    }
}

/// Session history and context cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are removed by the retention sweep.
    pub retention_days: u32,
    /// Minimum interval between retention sweeps.
    pub cleanup_interval_secs: u64,
    /// Approximate token budget for history sent to the completion service.
    pub max_context_tokens: usize,
    /// Lifetime of a cached search context.
    pub context_ttl_secs: i64,
    pub cache_sweep_interval_secs: u64,
    /// Maximum accepted user message length in characters.
    pub max_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            cleanup_interval_secs: 86_400,
            max_context_tokens: 3000,
            context_ttl_secs: 1800,
            cache_sweep_interval_secs: 300,
            max_message_length: 2000,
        }
    }
}

/// Collaborator call concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on in-flight collaborator calls across all sessions.
    pub max_concurrent_calls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 8,
        }
    }
}
