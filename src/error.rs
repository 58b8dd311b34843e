use thiserror::Error;

/// Errors that can occur while issuing or recording requests.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (connection refused, file not found, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading or writing HAR content.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error reported by the HTTP connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A request or response could not be assembled.
    #[error("Invalid HTTP message: {0}")]
    HttpBuild(#[from] http::Error),

    /// URL parsing error for malformed URLs.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid user-supplied option or configuration value.
    #[error("{0}")]
    InvalidArgs(String),

    /// The outbound request has a shape a URL cannot be derived from.
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    /// A redirect was refused by the redirect policy or exceeded the limit.
    #[error("Redirect error: {0}")]
    Redirect(String),

    /// Connecting took longer than the configured timeout.
    #[error("Timed out connecting to {0}")]
    Timeout(String),

    /// The response body could not be read or decoded.
    #[error("Body error: {0}")]
    Body(String),
}

/// Convenience result type for fetch-har operations.
pub type Result<T> = std::result::Result<T, Error>;
