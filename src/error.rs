use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Payload parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config directory not available on this platform")]
    NoConfigDir,
}

pub type AppResult<T> = Result<T, AppError>;
