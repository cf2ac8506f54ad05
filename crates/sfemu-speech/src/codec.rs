use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};
use crate::request::PhonemeEvent;

/// In-memory encoding of a phoneme stream as the target program stores it.
///
/// The encoding is a host decision rather than something fixed by the engine, so it sits behind
/// this trait and each implementation is covered by its own tests.
pub trait PhonemeCodec {
    /// Decode events up to the terminator or the end of `bytes`.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<PhonemeEvent>>;

    /// Size of one encoded event in bytes.
    fn record_len(&self) -> usize;
}

/// One phoneme code per byte; `0x00` terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCodec;

impl PhonemeCodec for ByteCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<PhonemeEvent>> {
        Ok(bytes
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| PhonemeEvent::new(b))
            .collect())
    }

    fn record_len(&self) -> usize {
        1
    }
}

/// Four-byte records: phoneme, duration scale in sixteenths, pitch scale in sixteenths,
/// reserved. A record whose phoneme byte is `0x00` terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackedCodec;

impl PhonemeCodec for PackedCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<PhonemeEvent>> {
        let mut events = Vec::new();
        for (i, record) in bytes.chunks(4).enumerate() {
            if record[0] == 0 {
                break;
            }
            let &[phoneme, duration, pitch, _reserved] = record else {
                return Err(SpeechError::TruncatedRecord { offset: i * 4 });
            };
            events.push(PhonemeEvent {
                phoneme,
                duration_scale: f32::from(duration) / 16.0,
                pitch_scale: f32::from(pitch) / 16.0,
            });
        }
        Ok(events)
    }

    fn record_len(&self) -> usize {
        4
    }
}

/// Codec selection for configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Byte,
    Packed,
}

impl PhonemeCodec for CodecKind {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<PhonemeEvent>> {
        match self {
            CodecKind::Byte => ByteCodec.decode(bytes),
            CodecKind::Packed => PackedCodec.decode(bytes),
        }
    }

    fn record_len(&self) -> usize {
        match self {
            CodecKind::Byte => ByteCodec.record_len(),
            CodecKind::Packed => PackedCodec.record_len(),
        }
    }
}
