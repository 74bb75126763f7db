use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub openai: OpenAISettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAISettings {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl OpenAISettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub data_dir: String,
    pub max_image_size_mb: u64,
}

impl StorageSettings {
    pub fn max_image_bytes(&self) -> usize {
        (self.max_image_size_mb as usize) * 1024 * 1024
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local overrides
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with prefix FARMSMART_)
            .add_source(
                Environment::with_prefix("FARMSMART")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Plain variables such as OPENAI_API_KEY from .env win over files
        s.try_deserialize().map(Self::with_env_overrides)
    }

    /// Load settings from environment variables directly (simpler for production)
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::default().with_env_overrides())
    }
}

impl Settings {
    /// Apply environment variable overrides to default settings
    fn with_env_overrides(mut self) -> Self {
        // Server
        if let Ok(host) = env::var("SERVER_HOST") { self.server.host = host; }
        if let Ok(port) = env::var("SERVER_PORT") { self.server.port = port.parse().unwrap_or(8080); }
        if let Ok(origins) = env::var("CORS_ALLOWED_ORIGINS") {
            self.server.cors_allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        // OpenAI
        if let Ok(key) = env::var("OPENAI_API_KEY") { self.openai.api_key = key; }
        if let Ok(model) = env::var("OPENAI_MODEL") { self.openai.model = model; }
        if let Ok(base) = env::var("OPENAI_API_BASE") { self.openai.api_base = Some(base); }

        // Storage
        if let Ok(dir) = env::var("DATA_DIR") { self.storage.data_dir = dir; }
        if let Ok(mb) = env::var("MAX_IMAGE_SIZE_MB") { self.storage.max_image_size_mb = mb.parse().unwrap_or(10); }

        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
                cors_allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            openai: OpenAISettings {
                api_key: "".to_string(),
                api_base: None,
                model: "gpt-4o-mini".to_string(),
                max_tokens: 1024,
                temperature: 0.2,
            },
            storage: StorageSettings {
                data_dir: "./data".to_string(),
                max_image_size_mb: 10,
            },
        }
    }
}
