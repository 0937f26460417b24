//! Error types for the topograph-probe crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Graph error: {0}")]
    Graph(#[from] topograph_graph::GraphError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] topograph_graph::TransactionError),

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Failed to decode snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
