use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp not representable in the buffer: {0}")]
    Timestamp(DateTime<Utc>),

    #[error("Parameter `{key}` is not a finite float and cannot be buffered")]
    NonFiniteFloat { key: String },
}
