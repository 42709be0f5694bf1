//! Multipart audio upload parsing shared by the audio endpoints

use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;

use crate::{ApiError, ApiResult};

/// Largest accepted recording (matches the speech-to-text provider limit)
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Request body limit for audio routes: the file plus form overhead
pub const AUDIO_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

/// Extensions accepted when the client sends a generic content type
const AUDIO_EXTENSIONS: &[&str] = &[
    "wav", "mp3", "m4a", "mp4", "mpeg", "mpga", "webm", "ogg", "oga", "flac", "aac",
];

/// Uploaded recording
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
}

impl AudioUpload {
    /// Lower-case file extension, if the file name has one
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    fn is_audio(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.starts_with("audio/")
            || content_type == "video/webm"
            || content_type == "video/mp4"
            || self
                .extension()
                .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
    }
}

/// Parsed audio form: the file plus optional hints
#[derive(Debug, Clone)]
pub struct AudioForm {
    pub audio: AudioUpload,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!(
            "Upload exceeds {} MiB",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        ))
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", e.body_text()))
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Read the `audio` file (alias `file`) plus `language` and `prompt`
pub async fn read_audio_form(mut multipart: Multipart) -> ApiResult<AudioForm> {
    let mut audio = None;
    let mut language = None;
    let mut prompt = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" | "file" => {
                let file_name = field.file_name().unwrap_or("recording").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                audio = Some(AudioUpload { bytes, file_name, content_type });
            }
            "language" => language = non_empty(field.text().await.map_err(multipart_error)?),
            "prompt" => prompt = non_empty(field.text().await.map_err(multipart_error)?),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let audio = audio.ok_or_else(|| ApiError::BadRequest("Missing 'audio' file field".to_string()))?;

    if audio.bytes.is_empty() {
        return Err(ApiError::BadRequest("Audio file is empty".to_string()));
    }
    if audio.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge(format!(
            "Audio file is {} bytes; the limit is {} bytes",
            audio.bytes.len(),
            MAX_UPLOAD_BYTES
        )));
    }
    if !audio.is_audio() {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Expected an audio file, got '{}' ({})",
            audio.file_name, audio.content_type
        )));
    }

    if let Some(lang) = language.take() {
        let valid = (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_alphabetic());
        if !valid {
            return Err(ApiError::BadRequest(format!(
                "Language must be an ISO-639-1 code such as 'en', got '{}'",
                lang
            )));
        }
        language = Some(lang.to_ascii_lowercase());
    }

    Ok(AudioForm { audio, language, prompt })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(file_name: &str, content_type: &str) -> AudioUpload {
        AudioUpload {
            bytes: Bytes::from_static(b"x"),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_audio_detection() {
        assert!(upload("answer.webm", "audio/webm;codecs=opus").is_audio());
        assert!(upload("answer", "audio/mpeg").is_audio());
        assert!(upload("Answer.M4A", "application/octet-stream").is_audio());
        assert!(upload("clip.webm", "video/webm").is_audio());
        assert!(!upload("photo.jpg", "image/jpeg").is_audio());
        assert!(!upload("notes.txt", "application/octet-stream").is_audio());
    }

    #[test]
    fn test_extension() {
        assert_eq!(upload("a.b.WAV", "").extension().as_deref(), Some("wav"));
        assert_eq!(upload("noext", "").extension(), None);
        assert_eq!(upload("trailing.", "").extension(), None);
    }
}
