use thiserror::Error;

use crate::controller::ControllerError;
use crate::document::{StoreError, WorkspaceError};
use crate::gateway::BatchRejected;
use crate::llm::ProviderError;
use crate::tool_loop::LoopError;
use crate::workflow::{StatusError, TransitionError};

/// Crate-level error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum NovelflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chapter job failed: {0}")]
    Controller(#[from] ControllerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Batch rejected: {0}")]
    Batch(#[from] BatchRejected),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
