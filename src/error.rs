use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarveError {
    #[error("Carving engine unavailable: cannot allocate {requested} byte window")]
    EngineUnavailable { requested: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CarveError>;
