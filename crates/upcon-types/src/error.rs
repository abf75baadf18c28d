use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpconError {
    #[error("Solver failed at t={t}: {message}")]
    SolverFailed { t: f64, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Wrong optimization method: {0}")]
    UnsupportedMethod(String),

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),
}

pub type UpconResult<T> = Result<T, UpconError>;
