//! Shared error types.

use thiserror::Error;

/// Reasons an inbound envelope could not be turned into a [`crate::Command`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// The input is not a `{tag, data}` JSON object.
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// The tag does not name any known command.
    #[error("unknown command tag `{0}`")]
    UnknownTag(String),
    /// The tag is known but its data does not match the command's shape.
    #[error("malformed `{tag}` data: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CommandError {
    /// True when the envelope was simply addressed to nothing we handle.
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, CommandError::UnknownTag(_))
    }
}
