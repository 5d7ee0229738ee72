use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for the Snap2SNOMED client
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Snap2SnomedConfig {
    /// Mapping REST API settings
    pub api: ApiConfig,
    /// Identity provider settings
    pub auth: AuthConfig,
    /// Batch automap settings
    pub automap: AutomapConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the mapping API, e.g. https://snap2snomed.example.org/api/
    pub base_url: String,
    /// Per-request timeout, enforced by the HTTP transport
    pub request_timeout_seconds: u64,
    /// Retries for transient failures (connect errors, 5xx)
    pub retry_attempts: u32,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
    /// TTL for cached terminology lookups
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Hosted login domain of the identity provider
    pub domain: String,
    /// OAuth2 app client id
    pub client_id: String,
    /// Redirect URI registered for the app client
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Where tokens and preferences are cached between runs
    pub session_file: String,
    /// ID-token group granting administrator rights
    pub admin_group: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutomapConfig {
    /// Number of row chunks processed concurrently
    pub chunks: usize,
    /// Concepts requested per terminology search
    pub search_count: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            request_timeout_seconds: 30,
            retry_attempts: 3,
            rate_limit: RateLimitConfig::default(),
            cache_ttl_seconds: 300, // 5 minutes
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_capacity: 20,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: "https://auth.snap2snomed.app/".to_string(),
            client_id: String::new(),
            redirect_uri: "http://localhost:4200/auth".to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            session_file: ".snap2snomed/session.json".to_string(),
            admin_group: "snap2snomed-admin".to_string(),
        }
    }
}

impl Default for AutomapConfig {
    fn default() -> Self {
        Self {
            chunks: 5,
            search_count: 1,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Snap2SnomedConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (snap2snomed.toml, .snap2snomed-rc)
    /// 3. Environment variables (prefixed with SNAP2SNOMED__, e.g.
    ///    SNAP2SNOMED__API__BASE_URL)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("snap2snomed.toml").exists() {
            builder = builder.add_source(File::with_name("snap2snomed"));
        }

        if Path::new(".snap2snomed-rc").exists() {
            builder = builder.add_source(
                File::with_name(".snap2snomed-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("SNAP2SNOMED")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.scopes")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let snap2snomed_config: Snap2SnomedConfig = config.try_deserialize()?;
        Ok(snap2snomed_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<Snap2SnomedConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = Snap2SnomedConfig::load_env_file();
        Snap2SnomedConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static Snap2SnomedConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Snap2SnomedConfig::default();
        assert_eq!(config.automap.chunks, 5);
        assert_eq!(config.api.retry_attempts, 3);
        assert!(config.auth.scopes.contains(&"openid".to_string()));
    }

    #[test]
    fn test_save_and_reload_through_config_crate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap2snomed.toml");

        let mut original = Snap2SnomedConfig::default();
        original.api.base_url = "https://mapping.example.org/api/".to_string();
        original.automap.chunks = 2;
        original.save_to_file(&path).unwrap();

        let reloaded: Snap2SnomedConfig = Config::builder()
            .add_source(File::from(path.as_path()))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(reloaded.api.base_url, "https://mapping.example.org/api/");
        assert_eq!(reloaded.automap.chunks, 2);
        assert_eq!(reloaded.auth.session_file, ".snap2snomed/session.json");
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[automap]\nchunks = 8\n").unwrap();

        let loaded: Snap2SnomedConfig = Config::builder()
            .add_source(File::from(path.as_path()))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(loaded.automap.chunks, 8);
        assert_eq!(loaded.automap.search_count, 1);
        assert_eq!(loaded.api.request_timeout_seconds, 30);
    }
}
