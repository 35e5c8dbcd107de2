//! Error types for the bridge

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// OSC packet could not be encoded
    #[error("OSC encode error: {0}")]
    OscEncode(String),

    /// OSC packet could not be decoded
    #[error("OSC decode error: {0}")]
    OscDecode(String),

    /// HTTP request to a discovered peer failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed discovery document
    #[error("Invalid discovery document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    /// mDNS daemon error
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// No game connection is currently established
    #[error("No game connection established")]
    NotConnected,

    /// Remote device is not known or has no live stream
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(uuid::Uuid),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<mdns_sd::Error> for Error {
    fn from(e: mdns_sd::Error) -> Self {
        Error::Mdns(e.to_string())
    }
}

impl From<rosc::OscError> for Error {
    fn from(e: rosc::OscError) -> Self {
        Error::OscDecode(format!("{e:?}"))
    }
}
