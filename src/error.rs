use crate::hub::HubError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum CoolingError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Outdoor temperature source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to write {capability} on {device}: {reason}")]
    WriteFailure {
        device: String,
        capability: String,
        reason: String,
    },

    #[error("No cooling device available")]
    NoManagedDevices,

    #[error("Cooling engine is not running")]
    EngineStopped,

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl CoolingError {
    /// Symbolic name rendered by the settings page and the log stream.
    pub fn event_name(&self) -> String {
        match self {
            CoolingError::Configuration(reason) => format!("error.{reason}"),
            CoolingError::NotFound(_) => "error.not_found".to_string(),
            CoolingError::SourceUnavailable(_) => "error.source_unavailable".to_string(),
            CoolingError::WriteFailure { .. } => "error.write_failure".to_string(),
            CoolingError::NoManagedDevices => "error.no_device".to_string(),
            CoolingError::EngineStopped => "error.stopped".to_string(),
            CoolingError::Hub(_) => "error.hub".to_string(),
            CoolingError::IoError(_) | CoolingError::SerdeJsonError(_) => {
                "error.storage".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CoolingError>;
