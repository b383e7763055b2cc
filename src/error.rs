//! Error types shared across the simulator

use crate::simulation::{SessionId, SimulationReport};

/// Errors surfaced by the simulation core, the session layer and the path store
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown attack action: {0}")]
    UnknownAction(String),
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt attack path record: {0}")]
    CorruptRecord(String),
    #[error("Simulation finished but its attack path was not saved: {source}")]
    Persistence {
        #[source]
        source: Box<LabError>,
        report: Box<SimulationReport>,
    },
}

impl LabError {
    /// Whether the caller sent something the core rejected (as opposed to a server fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LabError::InvalidInput(_) | LabError::UnknownAction(_) | LabError::UnknownSession(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LabError>;
