//! Errors raised at the notification collaborator seams.

use thiserror::Error;

/// A stored payload could not be decoded for its kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The JSON does not match the envelope or payload shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The envelope carries a schema version this build cannot read.
    #[error("unsupported schema version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// The payload variant belongs to a different kind.
    #[error("payload type {payload_type} does not match kind {kind}")]
    KindMismatch {
        /// Kind of the stored row.
        kind: String,
        /// Tag of the decoded payload.
        payload_type: &'static str,
    },
}

/// A composer could not render a message.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The template engine rejected a template at registration.
    #[error("template {name} is invalid: {message}")]
    Template {
        /// Template name.
        name: String,
        /// Engine message.
        message: String,
    },

    /// Rendering failed, e.g. a variable is missing in strict mode.
    #[error("render failed: {0}")]
    Render(String),

    /// The composer does not handle this payload type.
    #[error("composer {composer} cannot render {payload_type} payloads")]
    Unsupported {
        /// Composer key.
        composer: &'static str,
        /// Tag of the payload.
        payload_type: &'static str,
    },
}

/// A sender failed while attempting delivery.
#[derive(Debug, Error)]
pub enum SendError {
    /// The recipient or sender address could not be parsed.
    #[error("invalid address {address}: {message}")]
    Address {
        /// The offending address.
        address: String,
        /// Parser message.
        message: String,
    },

    /// The message could not be assembled.
    #[error("message build failed: {0}")]
    Build(String),

    /// The transport failed or the server refused the message.
    #[error("transport failed: {0}")]
    Transport(String),
}
