use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("sender {sender} doesn't match signer {signer}")]
    SenderMismatch { sender: String, signer: String },

    #[error("signature error: {0}")]
    Signature(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("request {0} already exists")]
    DuplicateRequest(String),

    #[error("request {0} not found")]
    RequestNotFound(String),

    #[error("request cache is full ({0} entries)")]
    CacheFull(usize),

    #[error("unknown gateway: {0}")]
    UnknownGateway(String),

    #[error("no live connection to gateway {0}")]
    NotConnected(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),
}
