use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaneError {
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Scaler error: {0}")]
    Scaler(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PlaneError>;
