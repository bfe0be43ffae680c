use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event sink could not record or look up an event.
    #[error("Event sink error: {0}")]
    EventSink(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
