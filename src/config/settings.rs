use crate::utils::error::{ProtocolError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "protocol-improver.toml";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const API_KEY_PREFIX: &str = "sk-ant-";
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];
pub const MAX_FILE_SIZE_MB_LIMIT: usize = 1024;

/// Service configuration. Every section is optional in the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allow_origins: Option<Vec<String>>,
    pub json_logs: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub improve_temperature: Option<f32>,
    pub request_timeout_seconds: Option<u64>,
    pub max_content_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_file_size_mb: Option<usize>,
    pub allowed_extensions: Option<Vec<String>>,
    pub output_folder: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub ttl_seconds: Option<u64>,
    pub max_entries: Option<usize>,
}

impl Settings {
    /// 載入設定：`.env`、TOML 檔案（若存在）、最後套用環境變數
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ProtocolError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ProtocolError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ANTHROPIC_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ProtocolError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.model.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(host) = std::env::var("PROTOCOL_IMPROVER_HOST") {
            self.server.host = Some(host);
        }
        if let Ok(port) = std::env::var("PROTOCOL_IMPROVER_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid PROTOCOL_IMPROVER_PORT: {}", port),
            }
        }
    }

    pub fn host(&self) -> &str {
        self.server.host.as_deref().unwrap_or("0.0.0.0")
    }

    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or(8000)
    }

    pub fn cors_allow_origins(&self) -> Vec<String> {
        self.server
            .cors_allow_origins
            .clone()
            .unwrap_or_else(|| vec!["*".to_string()])
    }

    pub fn json_logs(&self) -> bool {
        self.server.json_logs.unwrap_or(false)
    }

    pub fn api_key(&self) -> Option<&str> {
        self.model.api_key.as_deref()
    }

    pub fn base_url(&self) -> &str {
        self.model
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com")
    }

    pub fn model_name(&self) -> &str {
        self.model
            .model
            .as_deref()
            .unwrap_or("claude-sonnet-4-20250514")
    }

    pub fn max_tokens(&self) -> u32 {
        self.model.max_tokens.unwrap_or(4000)
    }

    pub fn temperature(&self) -> f32 {
        self.model.temperature.unwrap_or(0.3)
    }

    pub fn improve_temperature(&self) -> f32 {
        self.model.improve_temperature.unwrap_or(0.3)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_seconds.unwrap_or(120))
    }

    pub fn max_content_chars(&self) -> usize {
        self.model.max_content_chars.unwrap_or(100_000)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.upload
            .max_file_size_mb
            .unwrap_or(10)
            .saturating_mul(1024 * 1024)
    }

    pub fn allowed_extensions(&self) -> Vec<String> {
        self.upload
            .allowed_extensions
            .clone()
            .unwrap_or_else(|| SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect())
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect()
    }

    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension {
            Some(ext) => self.allowed_extensions().iter().any(|allowed| *allowed == ext),
            None => false,
        }
    }

    pub fn output_folder(&self) -> &str {
        self.upload.output_folder.as_deref().unwrap_or("./outputs")
    }

    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store.ttl_seconds.unwrap_or(3600))
    }

    pub fn store_max_entries(&self) -> usize {
        self.store.max_entries.unwrap_or(256)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        // 驗證 API 金鑰
        let api_key = validation::validate_required_field("model.api_key", &self.model.api_key)?;
        validation::validate_non_empty_string("model.api_key", api_key)?;
        if !api_key.starts_with(API_KEY_PREFIX) {
            return Err(ProtocolError::InvalidConfigValueError {
                field: "model.api_key".to_string(),
                value: format!("{}...", api_key.chars().take(7).collect::<String>()),
                reason: format!("API key should start with '{}'", API_KEY_PREFIX),
            });
        }

        validation::validate_url("model.base_url", self.base_url())?;
        validation::validate_non_empty_string("model.model", self.model_name())?;
        validation::validate_positive_number("model.max_tokens", self.max_tokens() as usize, 1)?;
        validation::validate_range("model.temperature", self.temperature(), 0.0, 1.0)?;
        validation::validate_range(
            "model.improve_temperature",
            self.improve_temperature(),
            0.0,
            1.0,
        )?;
        validation::validate_positive_number(
            "model.request_timeout_seconds",
            self.request_timeout().as_secs() as usize,
            1,
        )?;
        validation::validate_positive_number("model.max_content_chars", self.max_content_chars(), 1)?;

        validation::validate_positive_number("server.port", self.port() as usize, 1)?;

        validation::validate_range(
            "upload.max_file_size_mb",
            self.upload.max_file_size_mb.unwrap_or(10),
            1,
            MAX_FILE_SIZE_MB_LIMIT,
        )?;
        validation::validate_extensions(
            "upload.allowed_extensions",
            &self.allowed_extensions(),
            SUPPORTED_EXTENSIONS,
        )?;
        validation::validate_path("upload.output_folder", self.output_folder())?;

        validation::validate_positive_number("store.max_entries", self.store_max_entries(), 1)?;
        validation::validate_positive_number(
            "store.ttl_seconds",
            self.store_ttl().as_secs() as usize,
            1,
        )?;

        Ok(())
    }
}
