//! Article generation and transcript Q&A over a Gemini-style LLM endpoint
//!
//! The session hands a finished transcript here; everything else is prompt
//! construction and strict-JSON parsing. Failures are typed and propagated
//! verbatim — no automatic retry, the caller decides.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Errors from the article backend
#[derive(Debug, Error)]
pub enum ArticleError {
    /// No API key configured
    #[error("no API key configured — set article.api_key or GEMINI_API_KEY")]
    MissingCredential,
    /// Transport-level failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success HTTP status
    #[error("API request failed with status {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },
    /// The model refused the prompt
    #[error("request blocked by the model: {0}")]
    Blocked(String),
    /// The response carried no text at all
    #[error("no content generated")]
    Empty,
    /// The response text was not the promised JSON structure
    #[error("malformed article response: {0}")]
    Malformed(String),
}

/// Requested article shape
#[derive(Debug, Clone)]
pub struct ArticleStyle {
    /// Writing style, e.g. "professional"
    pub style: String,
    /// Tone, e.g. "informative"
    pub tone: String,
    /// Target length band
    pub length: ArticleLength,
    /// Target audience, when specified
    pub audience: Option<String>,
}

impl Default for ArticleStyle {
    fn default() -> Self {
        Self {
            style: "professional".to_owned(),
            tone: "informative".to_owned(),
            length: ArticleLength::Medium,
            audience: None,
        }
    }
}

/// Target article length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArticleLength {
    /// 400-600 words
    Short,
    /// 600-900 words
    #[default]
    Medium,
    /// 900-1200 words
    Long,
}

impl ArticleLength {
    /// Parse a config value, defaulting to medium
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "short" => Self::Short,
            "long" => Self::Long,
            _ => Self::Medium,
        }
    }

    const fn word_range(self) -> &'static str {
        match self {
            Self::Short => "short: 400-600 words",
            Self::Medium => "medium: 600-900 words",
            Self::Long => "long: 900-1200 words",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

/// One section of a generated article
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ArticleSection {
    /// Section heading
    pub heading: String,
    /// Section body
    pub content: String,
}

/// Structured article produced from a transcript
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GeneratedArticle {
    /// Headline
    pub title: String,
    /// Overview paragraph
    pub summary: String,
    /// Body sections
    pub sections: Vec<ArticleSection>,
    /// Actionable takeaways
    #[serde(default)]
    pub takeaways: Vec<String>,
    /// Suggested hashtags
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// One prior question/answer pair for follow-up context
#[derive(Debug, Clone)]
pub struct QaExchange {
    /// The question asked
    pub question: String,
    /// The answer given
    pub answer: String,
}

// Wire types for the generateContent API

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Client for the article/Q&A backend
pub struct ArticleClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl ArticleClient {
    /// Create a client for the given model
    ///
    /// # Errors
    /// Returns [`ArticleError::MissingCredential`] for an empty key
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ArticleError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ArticleError::MissingCredential);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.into(),
        })
    }

    /// Transform a transcript into a structured article
    ///
    /// # Errors
    /// Typed [`ArticleError`] variants; never retried here
    pub async fn generate(
        &self,
        transcript: &str,
        style: &ArticleStyle,
    ) -> Result<GeneratedArticle, ArticleError> {
        info!(transcript_chars = transcript.len(), "generating article");

        let text = self
            .generate_content(
                vec![
                    article_system_prompt(style),
                    format!("Here is the transcript to transform into an article:\n\n{transcript}"),
                ],
                0.7,
            )
            .await?;

        parse_article(&text)
    }

    /// Answer a question about a finished transcript
    ///
    /// # Errors
    /// Typed [`ArticleError`] variants; never retried here
    pub async fn answer(
        &self,
        transcript: &str,
        question: &str,
        history: &[QaExchange],
    ) -> Result<String, ArticleError> {
        info!(question_chars = question.len(), "answering transcript question");

        let text = self
            .generate_content(vec![qa_prompt(transcript, question, history)], 0.3)
            .await?;

        if text.is_empty() {
            return Err(ArticleError::Empty);
        }
        Ok(text)
    }

    async fn generate_content(
        &self,
        parts: Vec<String>,
        temperature: f32,
    ) -> Result<String, ArticleError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: parts.into_iter().map(|text| Part { text }).collect(),
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: 8192,
            },
        };

        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self.http.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArticleError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;

        if let Some(feedback) = parsed.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(ArticleError::Blocked(reason));
            }
        }

        let text = parsed
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(ArticleError::Empty)?;

        debug!(response_chars = text.len(), "model response received");
        Ok(text.trim().to_owned())
    }
}

fn article_system_prompt(style: &ArticleStyle) -> String {
    let audience = style
        .audience
        .as_deref()
        .unwrap_or("general professional audience");
    format!(
        r#"You are an expert content writer who transforms spoken transcripts into professional articles.

Based on the transcript provided, generate a comprehensive article with the following specifications:
- Style: {style}
- Tone: {tone}
- Length: {length} ({words})
- Target Audience: {audience}

Your response MUST be valid JSON with this exact structure:
{{
  "title": "A compelling title based on key themes",
  "summary": "A 150-200 word overview of the session",
  "sections": [
    {{
      "heading": "Section heading",
      "content": "2-3 paragraphs of detailed content for this section"
    }}
  ],
  "takeaways": ["Key actionable insight"],
  "hashtags": ["Hashtag"]
}}

Generate 4-6 sections based on the content.
Include 3-5 actionable takeaways.
Generate 8-12 relevant hashtags.

IMPORTANT: Respond ONLY with valid JSON, no additional text or markdown."#,
        style = style.style,
        tone = style.tone,
        length = style.length.label(),
        words = style.length.word_range(),
    )
}

fn qa_prompt(transcript: &str, question: &str, history: &[QaExchange]) -> String {
    let mut prompt = format!(
        "You are answering questions about a recorded session. \
         Answer concisely from the transcript only; say so when the \
         transcript does not contain the answer.\n\nTranscript:\n{transcript}\n"
    );
    if !history.is_empty() {
        prompt.push_str("\nPrevious exchanges:\n");
        for exchange in history {
            prompt.push_str(&format!("Q: {}\nA: {}\n", exchange.question, exchange.answer));
        }
    }
    prompt.push_str(&format!("\nQuestion: {question}"));
    prompt
}

/// Parse model output into an article, tolerating markdown code fences
fn parse_article(text: &str) -> Result<GeneratedArticle, ArticleError> {
    let json = strip_code_fence(text);

    let article: GeneratedArticle =
        serde_json::from_str(json).map_err(|e| ArticleError::Malformed(e.to_string()))?;

    if article.title.is_empty() || article.summary.is_empty() || article.sections.is_empty() {
        return Err(ArticleError::Malformed(
            "missing title, summary or sections".to_owned(),
        ));
    }
    Ok(article)
}

fn strip_code_fence(text: &str) -> &str {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    trimmed.trim()
}
