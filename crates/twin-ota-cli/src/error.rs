//! Error types for the twin-ota CLI

use thiserror::Error;
use twin_ota::{ErrorKind, PartitionError, UpdateError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Update failed: {0}")]
    Update(#[from] UpdateError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Slot storage error: {0}")]
    Slots(#[from] PartitionError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl CliError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Update(e) => match e.kind() {
                ErrorKind::MissingConfig => 2,
                ErrorKind::RollbackRejected => 4,
                ErrorKind::TransportOpenError | ErrorKind::TransportReadError => 5,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Short machine-readable name.
    pub fn type_name(&self) -> String {
        match self {
            CliError::Update(e) => e.kind().to_string(),
            CliError::InvalidConfiguration(_) => "InvalidConfiguration".to_string(),
            CliError::InvalidImage(_) => "InvalidImage".to_string(),
            CliError::Slots(_) => "SlotStorage".to_string(),
            CliError::IoError(_) => "Io".to_string(),
            CliError::JsonError(_) => "Json".to_string(),
            CliError::YamlError(_) => "Yaml".to_string(),
        }
    }
}
