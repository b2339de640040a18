use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO service {0} is not started")]
    NotStarted(String),

    #[error("socket error - {0}")]
    Io(#[from] std::io::Error),

    #[error("message codec error - {0}")]
    Codec(#[from] serde_json::Error),
}
