//! Service modules behind the HTTP functions
//!
//! Each external provider gets one client; all share the plumbing in
//! [`upstream`] (client builder, status checks, retry classification).

pub mod audio_quality;
pub mod completion_client;
pub mod email_client;
pub mod image_fetcher;
pub mod invitation_mailer;
pub mod narrative_writer;
pub mod transcription_client;
pub mod upstream;

pub use audio_quality::{AudioQualityAnalyzer, QualityIssue, QualityReport, QualityThresholds};
pub use completion_client::CompletionClient;
pub use email_client::{EmailClient, EmailMessage};
pub use image_fetcher::{FetchedImage, ImageFetcher};
pub use narrative_writer::{RewriteMode, RewriteRequest};
pub use transcription_client::{Transcription, TranscriptionClient, TranscriptionRequest};
pub use upstream::UpstreamError;

use crate::config::GatewayConfig;
use std::sync::Arc;

/// Clients that depend on runtime-settable API keys
///
/// Rebuilt whenever a key changes through `/api/settings/:key`.
#[derive(Clone, Default)]
pub struct UpstreamClients {
    pub transcription: Option<Arc<TranscriptionClient>>,
    pub completion: Option<Arc<CompletionClient>>,
    pub email: Option<Arc<EmailClient>>,
}

impl UpstreamClients {
    /// Build every client whose key is configured
    pub fn from_config(config: &GatewayConfig) -> Result<Self, UpstreamError> {
        let mut clients = Self::default();

        if let Some(key) = config.openai_api_key.clone() {
            clients.transcription = Some(Arc::new(TranscriptionClient::new(
                &config.openai_base_url,
                key.clone(),
                config.transcription_model.clone(),
                config.retry.clone(),
            )?));
            clients.completion = Some(Arc::new(CompletionClient::new(
                &config.openai_base_url,
                key,
                config.completion_model.clone(),
                config.retry.clone(),
            )?));
        }

        if let Some(key) = config.email_api_key.clone() {
            clients.email = Some(Arc::new(EmailClient::new(
                &config.email_base_url,
                key,
                config.retry.clone(),
            )?));
        }

        tracing::info!(
            transcription = clients.transcription.is_some(),
            completion = clients.completion.is_some(),
            email = clients.email.is_some(),
            "Upstream clients configured"
        );
        Ok(clients)
    }
}
