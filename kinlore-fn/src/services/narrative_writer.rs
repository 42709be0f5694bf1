//! Transcript to narrative rewriting
//!
//! Builds the completion prompt for each [`RewriteMode`] and cleans up the
//! model's answer (stray quotes, "Title:" prefixes, surrounding whitespace).

use serde::{Deserialize, Serialize};

use super::completion_client::{ChatMessage, CompletionClient};
use super::upstream::UpstreamError;

/// Longest transcript accepted for rewriting, in characters
pub const MAX_TRANSCRIPT_CHARS: usize = 20_000;

/// What the rewrite should produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteMode {
    /// Lightly edited first-person prose
    #[default]
    Narrative,
    /// Short chapter title
    Title,
    /// One or two sentence summary
    Summary,
}

impl RewriteMode {
    fn system_prompt(&self) -> &'static str {
        match self {
            RewriteMode::Narrative => {
                "You help families preserve their stories. Rewrite the spoken transcript \
                 into clear, readable first-person prose. Keep the narrator's voice, word \
                 choices and every fact. Remove filler words, false starts and repetition. \
                 Do not invent details, do not add a title and do not add commentary. \
                 Reply with the rewritten text only."
            }
            RewriteMode::Title => {
                "You write short, warm chapter titles for family memoirs. Reply with a \
                 single title of at most eight words, without quotes or punctuation at the end."
            }
            RewriteMode::Summary => {
                "You summarize family stories. Reply with one or two sentences in the \
                 third person describing what the narrator talks about. Do not invent details."
            }
        }
    }
}

/// Rewrite request after validation
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub transcript: String,
    pub question: Option<String>,
    pub narrator: Option<String>,
    pub mode: RewriteMode,
}

impl RewriteRequest {
    /// Trim inputs and enforce the transcript limits
    pub fn new(
        transcript: &str,
        question: Option<String>,
        narrator: Option<String>,
        mode: RewriteMode,
    ) -> Result<Self, UpstreamError> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(UpstreamError::InvalidRequest("Transcript is empty".to_string()));
        }
        let chars = transcript.chars().count();
        if chars > MAX_TRANSCRIPT_CHARS {
            return Err(UpstreamError::InvalidRequest(format!(
                "Transcript is {} characters; the limit is {}",
                chars, MAX_TRANSCRIPT_CHARS
            )));
        }

        let non_empty = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Ok(Self {
            transcript: transcript.to_string(),
            question: non_empty(question),
            narrator: non_empty(narrator),
            mode,
        })
    }

    fn messages(&self) -> Vec<ChatMessage> {
        let mut user = String::new();
        if let Some(narrator) = &self.narrator {
            user.push_str(&format!("Narrator: {}\n", narrator));
        }
        if let Some(question) = &self.question {
            user.push_str(&format!("Question answered: {}\n", question));
        }
        if !user.is_empty() {
            user.push('\n');
        }
        user.push_str("Transcript:\n");
        user.push_str(&self.transcript);

        vec![ChatMessage::system(self.mode.system_prompt()), ChatMessage::user(user)]
    }
}

/// Rewrite a transcript with the completion client
pub async fn rewrite(client: &CompletionClient, request: &RewriteRequest) -> Result<String, UpstreamError> {
    let raw = client.complete(&request.messages()).await?;
    let text = clean_output(&raw, request.mode);
    if text.is_empty() {
        return Err(UpstreamError::Parse("Completion returned empty text".to_string()));
    }

    tracing::info!(
        mode = ?request.mode,
        input_chars = request.transcript.len(),
        output_chars = text.len(),
        "Transcript rewritten"
    );
    Ok(text)
}

static QUOTE_PAIRS: [(char, char); 3] = [('"', '"'), ('“', '”'), ('\'', '\'')];

fn clean_output(raw: &str, mode: RewriteMode) -> String {
    let mut text = raw.trim();

    if mode == RewriteMode::Title {
        text = text.lines().next().unwrap_or("").trim();
        for prefix in ["Title:", "title:", "TITLE:"] {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim();
            }
        }
    }

    let quoted = QUOTE_PAIRS
        .iter()
        .find(|(open, close)| text.len() > 1 && text.starts_with(*open) && text.ends_with(*close));
    if let Some((open, close)) = quoted {
        text = text
            .strip_prefix(*open)
            .and_then(|t| t.strip_suffix(*close))
            .unwrap_or(text)
            .trim();
    }

    if mode == RewriteMode::Title {
        text = text.trim_end_matches(['.', '!']).trim_end();
    }

    text.to_string()
}
