//! Supervisor errors

use thiserror::Error;

use crate::bus::BusError;

/// Errors returned by supervisor commands
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Unknown charge point: {0}")]
    UnknownChargePoint(String),

    #[error("Charge points still alive after wait budget: {pending:?}")]
    Timeout { pending: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
