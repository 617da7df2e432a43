use thiserror::Error;
use waymark_events::BufferError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Drain loop already started for this bundler")]
    AlreadyLogging,
}
