//! Client-side error types.

use thiserror::Error;

/// Failures raised before a socket task is started.
///
/// Once a socket is running, failures are reported as notices instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported endpoint scheme `{0}`")]
    UnsupportedScheme(String),
}
