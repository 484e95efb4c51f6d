//! Error types for Triad

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TriadError>;

#[derive(Error, Debug)]
pub enum TriadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}

impl TriadError {
    /// Returns true for programming-time faults that must not be retried
    pub fn is_configuration(&self) -> bool {
        matches!(self, TriadError::Config(_) | TriadError::Assertion(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Bad event key `{0}`")]
    BadEventKey(String),

    #[error("Bad relay key `{0}`")]
    BadRelayKey(String),

    #[error("Cannot overwrite reserved method `{0}`")]
    ReservedName(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid request address: {0}")]
    InvalidAddress(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Path is empty")]
    EmptyPath,

    #[error("Cannot descend into `{segment}` of `{path}`: not a mapping")]
    NotAMapping { path: String, segment: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Syntax error: {0}")]
    Syntax(String),
}

/// Fail with [`TriadError::Assertion`] unless `condition` holds
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(TriadError::Assertion(message.into()))
    }
}
