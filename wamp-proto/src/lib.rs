pub mod codec;
pub mod framing;
pub mod messages;
pub mod uri;

pub use codec::*;
pub use framing::*;
pub use messages::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    #[error("Unknown message code: {0}")]
    UnknownMessageCode(u64),

    #[error("Malformed {kind} message: {detail}")]
    Malformed {
        kind: &'static str,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
