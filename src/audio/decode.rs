//! Container decoding using Symphonia.
//!
//! The ingestor hands over the whole accumulated byte range on every attempt.
//! An attempt in [`DecodeMode::Complete`] only succeeds when the container is
//! whole by its own framing (RIFF size for WAV, exact MPEG frame walk for
//! MP3). [`DecodeMode::Final`] decodes whatever is there.

use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::format::StreamFormat;
use super::frame::AudioFrame;
use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Mid-stream attempt; incomplete containers fail.
    Complete,
    /// Last attempt at end of stream; partial containers are accepted.
    Final,
}

/// Decodes an entire container held in memory into one frame.
pub fn decode_container(format: StreamFormat, bytes: Vec<u8>, mode: DecodeMode) -> Result<AudioFrame> {
    if mode == DecodeMode::Complete && !is_complete(format, &bytes) {
        return Err(StreamError::Decode(format!(
            "incomplete {} container ({} bytes)",
            format.name(),
            bytes.len()
        )));
    }

    let len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.name());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| StreamError::Decode(format!("probe failed: {}", e)))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| StreamError::Decode("no audio track found".to_string()))?;

    let track_id = track.id;
    let mut channel_count = track.codec_params.channels.map_or(0, |c| c.count());
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| StreamError::Decode(format!("decoder creation failed: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) if mode == DecodeMode::Final && !interleaved.is_empty() => {
                log::debug!("stopping final decode early: {}", e);
                break;
            }
            Err(e) => return Err(StreamError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(StreamError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        channel_count = spec.channels.count();
        sample_rate = spec.rate;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.is_empty() || channel_count == 0 || sample_rate == 0 {
        return Err(StreamError::Decode(format!(
            "no samples decoded from {} bytes",
            len
        )));
    }

    let mut channels: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(interleaved.len() / channel_count))
        .collect();
    for frame_samples in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame_samples) {
            channel.push(*sample);
        }
    }

    log::debug!(
        "Decoded {} bytes of {}: {} samples x {}ch @ {}Hz",
        len,
        format.name(),
        channels[0].len(),
        channel_count,
        sample_rate
    );

    Ok(AudioFrame::new(sample_rate, channels))
}

/// Whether the bytes hold a whole container by the format's own framing.
pub fn is_complete(format: StreamFormat, bytes: &[u8]) -> bool {
    match format {
        StreamFormat::Raw => true,
        StreamFormat::Wav => riff_complete(bytes),
        StreamFormat::Mp3 => mpeg_frames_complete(bytes),
    }
}

fn riff_complete(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return false;
    }
    let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as u64;
    bytes.len() as u64 >= declared + 8
}

const ID3V1_LEN: usize = 128;

fn mpeg_frames_complete(bytes: &[u8]) -> bool {
    let Some(mut pos) = first_sync(bytes, id3v2_len(bytes)) else {
        return false;
    };

    let mut frames = 0usize;
    loop {
        if pos == bytes.len() {
            return frames > 0;
        }
        let rest = &bytes[pos..];
        if frames > 0 && rest.len() == ID3V1_LEN && rest.starts_with(b"TAG") {
            return true;
        }
        let Some(frame_len) = mpeg_frame_len(rest) else {
            return false;
        };
        pos += frame_len;
        if pos > bytes.len() {
            return false;
        }
        frames += 1;
    }
}

fn id3v2_len(bytes: &[u8]) -> usize {
    if bytes.len() < 10 || &bytes[0..3] != b"ID3" {
        return 0;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b as usize & 0x7f));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

fn first_sync(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len().saturating_sub(3)).find(|&i| mpeg_frame_len(&bytes[i..]).is_some())
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// Length in bytes of the MPEG audio frame whose header starts `bytes`.
fn mpeg_frame_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 4 || bytes[0] != 0xff || bytes[1] & 0xe0 != 0xe0 {
        return None;
    }

    let version = (bytes[1] >> 3) & 0b11; // 3 = MPEG1, 2 = MPEG2, 0 = MPEG2.5
    let layer = (bytes[1] >> 1) & 0b11; // 3 = I, 2 = II, 1 = III
    let bitrate_idx = (bytes[2] >> 4) as usize;
    let rate_idx = ((bytes[2] >> 2) & 0b11) as usize;
    let padding = ((bytes[2] >> 1) & 1) as u32;

    if version == 1 || layer == 0 || bitrate_idx == 0 || bitrate_idx == 15 || rate_idx == 3 {
        return None;
    }

    let mpeg1 = version == 3;
    let kbps = if mpeg1 {
        BITRATES_V1[(3 - layer) as usize][bitrate_idx]
    } else if layer == 3 {
        BITRATES_V2[0][bitrate_idx]
    } else {
        BITRATES_V2[1][bitrate_idx]
    };
    let sample_rate = match version {
        3 => [44_100, 48_000, 32_000][rate_idx],
        2 => [22_050, 24_000, 16_000][rate_idx],
        _ => [11_025, 12_000, 8_000][rate_idx],
    };

    let bitrate = kbps * 1000;
    let len = match layer {
        3 => (12 * bitrate / sample_rate + padding) * 4,
        2 => 144 * bitrate / sample_rate + padding,
        _ if mpeg1 => 144 * bitrate / sample_rate + padding,
        _ => 72 * bitrate / sample_rate + padding,
    };

    Some(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{wav_bytes, LAME_MP3, LAME_MP3_FRAME_20};

    // MPEG1 layer III, 128 kbps, 44.1 kHz, no padding: 417 bytes per frame
    fn mp3_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xff, 0xfb, 0x90, 0x00]);
        frame
    }

    #[test]
    fn decodes_complete_wav() {
        let bytes = wav_bytes(22_050, 2, &[16_384, -16_384, 8_192, -8_192]);
        let frame = decode_container(StreamFormat::Wav, bytes, DecodeMode::Complete).unwrap();
        assert_eq!(frame.sample_rate(), 22_050);
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.sample_count(), 2);
        assert!((frame.channel(0).unwrap()[0] - 0.5).abs() < 1e-3);
        assert!((frame.channel(1).unwrap()[1] + 0.25).abs() < 1e-3);
    }

    #[test]
    fn truncated_wav_fails_until_final() {
        let samples: Vec<i16> = (0..48_000).map(|i| (i % 1000) as i16).collect();
        let mut bytes = wav_bytes(8_000, 1, &samples);
        bytes.truncate(bytes.len() - 20);

        assert!(!is_complete(StreamFormat::Wav, &bytes));
        assert!(decode_container(StreamFormat::Wav, bytes.clone(), DecodeMode::Complete).is_err());

        let frame = decode_container(StreamFormat::Wav, bytes, DecodeMode::Final).unwrap();
        assert!(frame.sample_count() > 0);
        assert!(frame.sample_count() < 48_000);
    }

    #[test]
    fn garbage_is_never_complete() {
        assert!(!is_complete(StreamFormat::Wav, b"not a riff header"));
        assert!(!is_complete(StreamFormat::Mp3, &[0u8; 64]));
        assert!(decode_container(StreamFormat::Wav, vec![1, 2, 3], DecodeMode::Final).is_err());
    }

    #[test]
    fn mpeg_frame_length_from_header() {
        assert_eq!(mpeg_frame_len(&[0xff, 0xfb, 0x90, 0x00]), Some(417));
        // padding bit set
        assert_eq!(mpeg_frame_len(&[0xff, 0xfb, 0x92, 0x00]), Some(418));
        // free-format bitrate is not walkable
        assert_eq!(mpeg_frame_len(&[0xff, 0xfb, 0x00, 0x00]), None);
    }

    #[test]
    fn mpeg_walk_requires_whole_frames() {
        let mut bytes = mp3_frame();
        bytes.extend(mp3_frame());
        assert!(is_complete(StreamFormat::Mp3, &bytes));

        bytes.extend(&mp3_frame()[..100]);
        assert!(!is_complete(StreamFormat::Mp3, &bytes));
    }

    #[test]
    fn decodes_real_mp3() {
        let frame = decode_container(StreamFormat::Mp3, LAME_MP3.to_vec(), DecodeMode::Complete).unwrap();
        assert_eq!(frame.sample_rate(), 22_050);
        assert_eq!(frame.channel_count(), 1);
        assert_eq!(frame.sample_count(), 25_920);
    }

    #[test]
    fn mp3_cut_mid_frame_waits_for_the_rest() {
        let cut = LAME_MP3[..LAME_MP3_FRAME_20 + 100].to_vec();
        assert!(!is_complete(StreamFormat::Mp3, &cut));
        assert!(decode_container(StreamFormat::Mp3, cut, DecodeMode::Complete).is_err());

        let aligned = &LAME_MP3[..LAME_MP3_FRAME_20];
        assert!(is_complete(StreamFormat::Mp3, aligned));
    }

    #[test]
    fn mp3_with_id3v1_tail_is_complete() {
        let mut tag = vec![0u8; 128];
        tag[..3].copy_from_slice(b"TAG");
        tag[3..12].copy_from_slice(b"Test tone");

        let mut bytes = LAME_MP3.to_vec();
        bytes.extend(&tag);
        assert!(is_complete(StreamFormat::Mp3, &bytes));
        let frame = decode_container(StreamFormat::Mp3, bytes, DecodeMode::Complete).unwrap();
        assert_eq!(frame.sample_rate(), 22_050);
        assert!(frame.sample_count() > 0);

        // a bare tag is not a stream
        assert!(!is_complete(StreamFormat::Mp3, &tag));
    }

    #[test]
    fn mpeg_walk_skips_id3v2_tag() {
        let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x05".to_vec();
        bytes.extend([0xffu8; 5]);
        bytes.extend(mp3_frame());
        assert!(is_complete(StreamFormat::Mp3, &bytes));
    }
}
