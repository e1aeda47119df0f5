//! Protocol error types

use thiserror::Error;

use crate::message::ApiVersion;

/// Errors that can occur during protocol operations
///
/// None of these are fatal for a connection: framing and payload errors
/// reset the read buffer, envelope errors drop the offending message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message is missing the `type` or `version` key, or they have the
    /// wrong shape
    #[error("message is missing a valid `type` or `version` key")]
    MalformedEnvelope,

    /// Major version of the message does not match ours
    #[error("incompatible message version {received:?}, expected major version {expected}")]
    VersionMismatch { received: ApiVersion, expected: i32 },

    /// Payload did not deserialize as the type its `type` key declared
    #[error("payload did not match its declared type `{expected}`: {source}")]
    TypeMismatch {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The decimal length prefix of a frame could not be parsed
    #[error("invalid frame length prefix: {0:?}")]
    BadLengthPrefix(String),

    /// Payload was not valid JSON
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
