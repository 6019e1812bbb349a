//! Dialogue engine and staff desk: the two entry points that sit between the
//! HTTP/CLI surfaces and the storage, retrieval and ML crates.

mod engine;
mod session_lock;
mod staff;

use civic_core::ValidationError;
use civic_storage::StorageError;
use thiserror::Error;

pub use engine::DialogueEngine;
pub use session_lock::SessionLocks;
pub use staff::{
    IncidentStatusView, StaffDesk, DEFAULT_INCIDENT_PAGE_SIZE, DEFAULT_KB_PAGE_SIZE,
    MAX_INCIDENT_PAGE_SIZE, MAX_KB_PAGE_SIZE,
};

#[derive(Debug, Error)]
pub enum TurnError {
    /// Rejected before the dialogue state was read.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Store or retrieval failure; nothing from the turn was committed.
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StaffError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("incident `{0}` not found")]
    NotFound(String),
    #[error("staff operation failed: {0:#}")]
    Dependency(anyhow::Error),
}

impl From<anyhow::Error> for StaffError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast_ref::<StorageError>() {
            Some(StorageError::IncidentNotFound(public_id)) => Self::NotFound(public_id.clone()),
            _ => Self::Dependency(error),
        }
    }
}
