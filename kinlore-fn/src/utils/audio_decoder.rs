//! Audio Decoding Utilities
//!
//! **Purpose:** Stream uploaded recordings as mono f32 PCM for the quality
//! heuristic.
//!
//! Uses symphonia for format-agnostic decoding (WAV, MP3, FLAC, AAC, OGG).
//! Samples are handed to a callback packet by packet and never collected,
//! so a long recording costs CPU time but not memory. Decoding is
//! CPU-bound; async callers run it on the blocking pool.

use anyhow::{Context, Result};
use axum::body::Bytes;
use std::io::Cursor;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// What was decoded, without the samples themselves
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Original channel count
    pub channels: usize,
    /// Mono samples handed to the callback
    pub frames: u64,
    pub duration_seconds: f64,
}

/// Decode an in-memory recording, passing each mono f32 sample to
/// `on_sample`
///
/// **Algorithm:**
/// 1. Probe the container (extension used as a hint only)
/// 2. Pick the first audio track and build its decoder
/// 3. Decode every packet, skipping corrupt ones
/// 4. Average each frame's channels to one sample
///
/// # Arguments
/// * `bytes` - Uploaded file contents
/// * `extension_hint` - File extension without the dot ("wav", "m4a")
/// * `on_sample` - Receives samples in order, range [-1.0, 1.0]
pub fn decode_audio_stream<F>(bytes: Bytes, extension_hint: Option<&str>, mut on_sample: F) -> Result<StreamInfo>
where
    F: FnMut(f32),
{
    let byte_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension_hint {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found in upload")?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut frames = 0u64;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow::anyhow!("Error reading packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                skipped_packets += 1;
                tracing::debug!(error = msg, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("Decode failed: {}", e)),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        if channel_count == 0 {
            channel_count = spec.channels.count();
        }

        frames += emit_mono(&decoded, &mut on_sample);
    }

    if sample_rate == 0 {
        anyhow::bail!("Sample rate unknown");
    }

    let duration_seconds = frames as f64 / sample_rate as f64;

    tracing::debug!(
        bytes = byte_len,
        sample_rate,
        channels = channel_count,
        frames,
        skipped_packets,
        duration_seconds = format!("{:.2}", duration_seconds),
        "Audio decoding complete"
    );

    Ok(StreamInfo {
        sample_rate,
        channels: channel_count,
        frames,
        duration_seconds,
    })
}

/// Hand `decoded` to `on_sample` one averaged frame at a time; returns the
/// frame count
fn emit_mono<F: FnMut(f32)>(decoded: &AudioBufferRef, on_sample: &mut F) -> u64 {
    match decoded {
        AudioBufferRef::U8(buf) => mix_down(buf, on_sample),
        AudioBufferRef::U16(buf) => mix_down(buf, on_sample),
        AudioBufferRef::U24(buf) => mix_down(buf, on_sample),
        AudioBufferRef::U32(buf) => mix_down(buf, on_sample),
        AudioBufferRef::S8(buf) => mix_down(buf, on_sample),
        AudioBufferRef::S16(buf) => mix_down(buf, on_sample),
        AudioBufferRef::S24(buf) => mix_down(buf, on_sample),
        AudioBufferRef::S32(buf) => mix_down(buf, on_sample),
        AudioBufferRef::F32(buf) => mix_down(buf, on_sample),
        AudioBufferRef::F64(buf) => mix_down(buf, on_sample),
    }
}

fn mix_down<S, F>(buf: &AudioBuffer<S>, on_sample: &mut F) -> u64
where
    S: Sample,
    f32: FromSample<S>,
    F: FnMut(f32),
{
    let num_channels = buf.spec().channels.count();
    if num_channels == 0 {
        return 0;
    }

    for frame_idx in 0..buf.frames() {
        let sum: f32 = (0..num_channels)
            .map(|ch| f32::from_sample(buf.chan(ch)[frame_idx]))
            .sum();
        on_sample(sum / num_channels as f32);
    }
    buf.frames() as u64
}
