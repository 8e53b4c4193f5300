//! Error types for the scheduler and its host boundary.

use recsched_model::ServiceKey;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures reported by host collaborators.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(ServiceKey),

    #[error("Driver not available: {0}")]
    DriverUnavailable(String),

    #[error("Tuning failed: {0}")]
    Tuning(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Power control error: {0}")]
    Power(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that keep the scheduler from becoming active.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No driver name configured")]
    NoDriverConfigured,

    #[error("Host is using driver {current:?}, expected {main:?} or {sub:?}")]
    DriverMismatch {
        current: Option<String>,
        main: String,
        sub: String,
    },

    #[error("Failed to load reservations: {0}")]
    LoadReservations(#[source] HostError),

    #[error("Failed to load queries: {0}")]
    LoadQueries(#[source] HostError),

    #[error("Failed to start keep-awake worker: {0}")]
    KeepAwake(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
