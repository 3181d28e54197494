//! Raw PCM conversion between interleaved little-endian bytes and per-channel
//! normalized floats.

use super::format::BitDepth;

const U8_CENTER: f32 = 128.0;
const S16_SCALE: f32 = 32_768.0;

/// Number of whole sample frames contained in `len` bytes.
pub fn frame_count(len: usize, depth: BitDepth, channels: usize) -> usize {
    let width = depth.bytes_per_sample() * channels;
    if width == 0 {
        0
    } else {
        len / width
    }
}

/// Converts interleaved bytes into one sequence per channel.
///
/// Only whole sample frames are converted; trailing bytes are ignored, the
/// caller decides what to do with them.
pub fn deinterleave(bytes: &[u8], depth: BitDepth, channels: usize) -> Vec<Vec<f32>> {
    let frames = frame_count(bytes.len(), depth, channels);
    let step = depth.bytes_per_sample();
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();

    for (i, sample) in bytes.chunks_exact(step).take(frames * channels).enumerate() {
        out[i % channels].push(sample_to_f32(sample, depth));
    }

    out
}

/// Inverse of [`deinterleave`]: interleaves per-channel floats into bytes.
///
/// Channels are assumed to be of equal length; extra samples in longer
/// channels are ignored.
pub fn interleave(channels: &[Vec<f32>], depth: BitDepth) -> Vec<u8> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len() * depth.bytes_per_sample());

    for index in 0..frames {
        for channel in channels {
            push_sample(&mut out, channel[index], depth);
        }
    }

    out
}

fn sample_to_f32(bytes: &[u8], depth: BitDepth) -> f32 {
    match depth {
        BitDepth::U8 => (bytes[0] as f32 - U8_CENTER) / U8_CENTER,
        BitDepth::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / S16_SCALE,
        BitDepth::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn push_sample(out: &mut Vec<u8>, sample: f32, depth: BitDepth) {
    match depth {
        BitDepth::U8 => {
            let value = (sample * U8_CENTER + U8_CENTER).round().clamp(0.0, 255.0) as u8;
            out.push(value);
        }
        BitDepth::S16 => {
            let value = (sample * S16_SCALE).round().clamp(-32_768.0, 32_767.0) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
        BitDepth::F32 => out.extend_from_slice(&sample.to_le_bytes()),
    }
}
