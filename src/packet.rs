//! Audio packet type shared by both transports.
//!
//! A packet is an owned, immutable buffer of little-endian signed 16-bit
//! PCM samples, mono, 44.1 kHz. Empty packets are legal and mean
//! "no audio". Cloning is cheap: the payload is refcounted.

use bytes::Bytes;

/// Sample rate of every stream the relay carries, in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    data: Bytes,
}

impl AudioPacket {
    pub fn new(data: impl Into<Bytes>) -> Self {
        AudioPacket { data: data.into() }
    }

    pub fn empty() -> Self {
        AudioPacket { data: Bytes::new() }
    }

    /// Serialize a slice of samples as little-endian i16.
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut buf = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        AudioPacket { data: Bytes::from(buf) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole i16 samples in the payload. A trailing odd byte,
    /// which a well-formed peer never sends, is ignored.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// The i16 sample at `index`. Panics if out of range.
    pub fn sample(&self, index: usize) -> i16 {
        let offset = index * 2;
        i16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
