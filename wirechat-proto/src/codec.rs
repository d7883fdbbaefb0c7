//! JSON text-frame codec for socket envelopes.

use thiserror::Error;

use crate::envelope::Envelope;

/// Errors produced while encoding or decoding envelope frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The frame was not a well-formed envelope.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encodes an envelope as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the envelope cannot be
/// serialized.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a JSON text frame into an envelope.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if the frame is not a well-formed
/// envelope.
pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::InvalidFrame(e.to_string()))
}
