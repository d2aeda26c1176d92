use thiserror::Error;

/// Transport-level failures. None of these are reported to clients; they
/// end the affected connection and trigger session teardown.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
