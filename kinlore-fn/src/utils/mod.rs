//! Utility modules for kinlore-fn

pub mod audio_decoder;

pub use audio_decoder::{decode_audio_stream, StreamInfo};
