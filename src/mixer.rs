//! Combines the buffered audio of several senders into one output packet.
//!
//! Samples at each index are averaged across the packets that actually
//! cover that index, then scaled by a fixed headroom factor before the
//! final clamp to the i16 range. Averaging keeps the level independent of
//! participant count; the headroom leaves margin against correlated peaks.

use crate::packet::AudioPacket;

/// Scale applied after averaging, before the clamp.
pub const HEADROOM: f64 = 0.5;

/// Mix any number of PCM packets into one. Packets may differ in length;
/// each output index averages only the packets long enough to cover it.
/// An empty input yields an empty packet.
pub fn mix(packets: &[AudioPacket]) -> AudioPacket {
    if packets.is_empty() {
        return AudioPacket::empty();
    }

    let sample_count = packets.iter().map(|p| p.sample_count()).max().unwrap_or(0);
    if sample_count == 0 {
        return AudioPacket::empty();
    }

    let mut sums = vec![0i32; sample_count];
    let mut counts = vec![0u32; sample_count];

    for packet in packets {
        for i in 0..packet.sample_count() {
            sums[i] += i32::from(packet.sample(i));
            counts[i] += 1;
        }
    }

    let mut mixed = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let sample = if counts[i] == 0 {
            0
        } else {
            let averaged = f64::from(sums[i]) / f64::from(counts[i]) * HEADROOM;
            averaged.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        };
        mixed.push(sample);
    }

    AudioPacket::from_samples(&mixed)
}
