use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid json frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame has no key")]
    MissingKey,

    #[error("{0} frame has no transaction_id")]
    MissingTransactionId(String),

    #[error("invalid date value: {0}")]
    InvalidDate(String),
}
