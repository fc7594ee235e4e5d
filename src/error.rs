use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Governance error: {0}")]
    Governance(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("State commit error: {0}")]
    StateCommit(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConcordError>;

impl From<secp256k1::Error> for ConcordError {
    fn from(err: secp256k1::Error) -> Self {
        ConcordError::Signature(err.to_string())
    }
}

impl From<serde_json::Error> for ConcordError {
    fn from(err: serde_json::Error) -> Self {
        ConcordError::Decode(err.to_string())
    }
}
