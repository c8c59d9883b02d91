use thiserror::Error;

/// Erreurs du pipeline de supervision
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Upstream returned HTTP {status} for {path}")]
    Status { status: u16, path: String },
    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),
    #[error("Unknown host: {0}")]
    UnknownHost(String),
    #[error("Host already registered: {0}")]
    DuplicateHost(String),
    #[error("Connection test failed for host {0}")]
    ConnectionFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Pipeline is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Decode(err.to_string())
    }
}

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

/// Erreurs de la diffusion temps réel
#[derive(Debug, Error, PartialEq)]
pub enum RealtimeError {
    #[error("Too many connection attempts from {0}")]
    Throttled(std::net::IpAddr),
    #[error("Bad client request: {0}")]
    BadRequest(String),
    #[error("Unknown client: {0}")]
    UnknownClient(String),
}
