use thiserror::Error;

/// Consumer-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with a stable error kind.
    #[error("bridge error {kind}: {message}")]
    Api { kind: String, message: String },

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("undecodable message: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
