use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Corrupt {format} file: {message}")]
    CorruptFile { format: String, message: String },

    #[error("No text could be extracted from the {format}")]
    EmptyDocument { format: String },

    #[error("File too large: {size} bytes (maximum {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Upload exceeds the maximum file size of {limit} bytes")]
    UploadTooLarge { limit: usize },

    #[error("Model API authentication failed: {message}")]
    Authentication { message: String },

    #[error("Model API rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Model API credit balance is too low: {message}")]
    InsufficientCredit { message: String },

    #[error("Model API returned {status}: {message}")]
    ModelApi { status: u16, message: String },

    #[error("Malformed model response: {message}")]
    MalformedResponse { message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Analysis not found: {id}")]
    AnalysisNotFound { id: String },

    #[error("File not found: {name}")]
    FileNotFound { name: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Document,
    Upstream,
    Request,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ProtocolError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::CorruptFile { .. }
            | Self::EmptyDocument { .. }
            | Self::FileTooLarge { .. }
            | Self::UploadTooLarge { .. } => ErrorCategory::Document,
            Self::Authentication { .. }
            | Self::RateLimited { .. }
            | Self::InsufficientCredit { .. }
            | Self::ModelApi { .. }
            | Self::MalformedResponse { .. }
            | Self::Http(_) => ErrorCategory::Upstream,
            Self::InvalidRequest { .. }
            | Self::AnalysisNotFound { .. }
            | Self::FileNotFound { .. } => ErrorCategory::Request,
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
            Self::IoError(_)
            | Self::SerializationError(_)
            | Self::ZipError(_)
            | Self::CsvError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Request => ErrorSeverity::Low,
            ErrorCategory::Document => ErrorSeverity::High,
            ErrorCategory::Upstream => match self {
                // 暫時性錯誤，稍後重試即可
                Self::RateLimited { .. } | Self::Http(_) => ErrorSeverity::Medium,
                _ => ErrorSeverity::High,
            },
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// Short machine-readable kind, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::CorruptFile { .. } => "corrupt_file",
            Self::EmptyDocument { .. } => "empty_document",
            Self::FileTooLarge { .. } | Self::UploadTooLarge { .. } => "file_too_large",
            Self::Authentication { .. } => "authentication_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::InsufficientCredit { .. } => "insufficient_credit",
            Self::ModelApi { .. } => "model_api_error",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Http(_) => "upstream_unreachable",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::AnalysisNotFound { .. } => "analysis_not_found",
            Self::FileNotFound { .. } => "file_not_found",
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => "configuration_error",
            Self::IoError(_)
            | Self::SerializationError(_)
            | Self::ZipError(_)
            | Self::CsvError(_) => "internal_error",
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::UnsupportedFormat { .. } => {
                "Upload a PDF (.pdf) or Word (.docx) document".to_string()
            }
            Self::CorruptFile { .. } => {
                "Re-export the document from its editor and upload it again".to_string()
            }
            Self::EmptyDocument { .. } => {
                "The document seems to contain only images; upload a text-based file".to_string()
            }
            Self::FileTooLarge { limit, .. } | Self::UploadTooLarge { limit } => {
                format!("Split the protocol or compress it below {} MB", limit / 1024 / 1024)
            }
            Self::Authentication { .. } => {
                "Check ANTHROPIC_API_KEY in your .env file or configuration".to_string()
            }
            Self::RateLimited { retry_after } => match retry_after {
                Some(wait) => format!("Wait {} seconds and try again", wait.as_secs()),
                None => "Wait a moment and try again".to_string(),
            },
            Self::InsufficientCredit { .. } => {
                "Add credit to the model provider account".to_string()
            }
            Self::ModelApi { .. } | Self::MalformedResponse { .. } => {
                "Try the analysis again; the model output was not usable".to_string()
            }
            Self::Http(_) => "Check network connectivity to the model API".to_string(),
            Self::InvalidRequest { .. } => "Check the request payload".to_string(),
            Self::AnalysisNotFound { .. } => "Please analyze the protocol again".to_string(),
            Self::FileNotFound { .. } => "Generate the improved protocol again".to_string(),
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => {
                "Fix the configuration file or environment variables and restart".to_string()
            }
            Self::IoError(_) => "Check file permissions and free disk space".to_string(),
            Self::SerializationError(_) | Self::ZipError(_) | Self::CsvError(_) => {
                "This is likely a bug; please report it with the logs".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Document => format!("Could not read the document: {}", self),
            ErrorCategory::Upstream => format!("The analysis service failed: {}", self),
            ErrorCategory::Request => self.to_string(),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("Internal error: {}", self),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedFormat { .. } | Self::InvalidRequest { .. } => 400,
            Self::AnalysisNotFound { .. } | Self::FileNotFound { .. } => 404,
            Self::FileTooLarge { .. } | Self::UploadTooLarge { .. } => 413,
            Self::CorruptFile { .. } | Self::EmptyDocument { .. } => 422,
            Self::RateLimited { .. } => 429,
            Self::Http(e) if e.is_timeout() => 504,
            Self::Authentication { .. }
            | Self::InsufficientCredit { .. }
            | Self::ModelApi { .. }
            | Self::MalformedResponse { .. }
            | Self::Http(_) => 502,
            _ => 500,
        }
    }
}
