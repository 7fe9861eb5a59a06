use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
