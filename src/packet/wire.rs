//! Flat, versioned wire format for carrying packets across a process boundary.
//!
//! One packet per JSON document:
//! `{"wire_version": 1, "packet": {"type": "evidence", ...}}`.

use serde::{Deserialize, Serialize};

use super::Packet;

/// Wire format version produced by [`encode`].
pub const WIRE_VERSION: u32 = 1;

/// Errors from encoding or decoding wire envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Payload is not valid JSON or does not match the packet schema.
    #[error("wire payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope declares a version this build cannot read.
    #[error("unsupported wire version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u32,
        /// Version this build reads.
        supported: u32,
    },
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    wire_version: u32,
    packet: &'a Packet,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    wire_version: u32,
    packet: serde_json::Value,
}

/// Encode a packet as a single-line JSON envelope.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if serialization fails.
pub fn encode(packet: &Packet) -> Result<String, WireError> {
    let envelope = EnvelopeOut {
        wire_version: WIRE_VERSION,
        packet,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a JSON envelope into a packet.
///
/// The version is checked before the packet body is interpreted.
///
/// # Errors
///
/// Returns [`WireError::UnsupportedVersion`] for unknown versions and
/// [`WireError::Malformed`] for anything that does not parse.
pub fn decode(payload: &str) -> Result<Packet, WireError> {
    let envelope: EnvelopeIn = serde_json::from_str(payload)?;
    if envelope.wire_version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion {
            found: envelope.wire_version,
            supported: WIRE_VERSION,
        });
    }
    Ok(serde_json::from_value(envelope.packet)?)
}
