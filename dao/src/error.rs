use agora_core::GovernanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<GovernanceError> for ConfigError {
    fn from(err: GovernanceError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

impl From<ConfigError> for GovernanceError {
    fn from(err: ConfigError) -> Self {
        GovernanceError::ExecutionFailed(err.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
