//! Wire envelopes exchanged with the relay server.
//!
//! Every WebSocket message is one MessagePack map of the form
//! `{"type": <kind>, "payload": {...}}`. Audio travels as a `bin` blob of
//! little-endian i16 samples rather than a numeric array.

use std::io::Cursor;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::convert::{i16_to_le_bytes, le_bytes_to_i16};

/// Sample rate of all PCM on the wire.
pub const WIRE_SAMPLE_RATE: u32 = 16000;

pub const AUDIO_STREAM: &str = "audio_stream";
pub const SYSTEM: &str = "system";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Msgpack(#[from] rmp_serde::decode::Error),
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodeError(#[from] rmp_serde::encode::Error);

/// One block of mono PCM at [`WIRE_SAMPLE_RATE`].
///
/// The payload is kept exactly as it travels: little-endian i16 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Advisory; the server usually substitutes the socket's identity.
    pub participant_id: String,
    pub pcm: Bytes,
    pub capture_timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(participant_id: String, samples: &[i16], capture_timestamp_ms: u64) -> Self {
        Self {
            participant_id,
            pcm: Bytes::from(i16_to_le_bytes(samples)),
            capture_timestamp_ms,
        }
    }

    /// Decoded samples; a dangling odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        le_bytes_to_i16(&self.pcm)
    }

    /// Size of the PCM payload on the wire.
    pub fn pcm_byte_len(&self) -> usize {
        self.pcm.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Audio(AudioFrame),
    System(SystemNotice),
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Audio(_) => AUDIO_STREAM,
            Envelope::System(_) => SYSTEM,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage<P> {
    #[serde(rename = "type")]
    kind: String,
    payload: P,
}

/// Only the tag, used to route before decoding the payload.
#[derive(Deserialize)]
struct WireTag {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct AudioPayload {
    participant_id: String,
    audio_data: Bytes,
    timestamp: u64,
}

pub fn encode(envelope: &Envelope) -> Result<Bytes, EncodeError> {
    let kind = envelope.kind().to_string();
    let buf = match envelope {
        Envelope::Audio(frame) => rmp_serde::to_vec_named(&WireMessage {
            kind,
            payload: AudioPayload {
                participant_id: frame.participant_id.clone(),
                audio_data: frame.pcm.clone(),
                timestamp: frame.capture_timestamp_ms,
            },
        })?,
        Envelope::System(notice) => rmp_serde::to_vec_named(&WireMessage {
            kind,
            payload: notice,
        })?,
    };
    Ok(Bytes::from(buf))
}

/// Decode one inbound message.
///
/// Returns `Ok(None)` for a well-formed envelope whose kind this client
/// does not handle.
pub fn decode(data: &[u8]) -> Result<Option<Envelope>, DecodeError> {
    let tag: WireTag = from_exact_slice(data)?;
    match tag.kind.as_str() {
        AUDIO_STREAM => {
            let msg: WireMessage<AudioPayload> = from_exact_slice(data)?;
            Ok(Some(Envelope::Audio(AudioFrame {
                participant_id: msg.payload.participant_id,
                pcm: msg.payload.audio_data,
                capture_timestamp_ms: msg.payload.timestamp,
            })))
        }
        SYSTEM => {
            let msg: WireMessage<SystemNotice> = from_exact_slice(data)?;
            Ok(Some(Envelope::System(msg.payload)))
        }
        _ => Ok(None),
    }
}

/// Like `rmp_serde::from_slice`, but the value must use the whole message.
fn from_exact_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, DecodeError> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(data));
    let value = T::deserialize(&mut de)?;
    let rest = data.len() - de.position() as usize;
    if rest > 0 {
        return Err(DecodeError::TrailingBytes(rest));
    }
    Ok(value)
}
