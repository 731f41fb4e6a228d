//! Insertion decisions from a language model.
//!
//! The model reads the transcript and answers with a JSON document of
//! insertions and rejections. Its answer is parsed leniently (one bad item
//! does not sink the rest) and then run through the same confidence,
//! spacing and bounds filters as any other decision source.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SpacingRule;
use crate::decision::{Decisions, InsertionDecision, RejectedInsertion};
use crate::error::{Error, Result};
use crate::timeline::AspectRatio;
use crate::transcript::Transcript;
use crate::validate;

pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f64 = 0.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default minimum confidence for a decision to be kept.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Produces insertion decisions for a transcript.
pub trait DecisionProvider {
    fn decide(
        &self,
        transcript: &Transcript,
        aspect_ratio: AspectRatio,
        threshold: f64,
    ) -> impl Future<Output = Result<Decisions>> + Send;
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: String,
    max_retries: u32,
    backoff: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, system_prompt: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: system_prompt.into(),
            max_retries: 2,
            backoff: Duration::from_secs(5),
        })
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(system_prompt: impl Into<String>) -> Result<Self> {
        match std::env::var(ANTHROPIC_API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Self::new(key, system_prompt),
            _ => Err(Error::MissingApiKey(ANTHROPIC_API_KEY_VAR)),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Retries after a rate-limit response; the n-th retry waits n × 5 s.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    async fn complete(&self, user_message: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
            "system": self.system_prompt,
            "messages": [{ "role": "user", "content": user_message }],
        });

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited("anthropic".into()));
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Llm(format!("API returned {status}: {text}")));
        }

        let message: MessageResponse = serde_json::from_str(&text)?;
        message
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| Error::Llm("response has no text content".into()))
    }
}

impl DecisionProvider for AnthropicProvider {
    async fn decide(
        &self,
        transcript: &Transcript,
        aspect_ratio: AspectRatio,
        threshold: f64,
    ) -> Result<Decisions> {
        let user_message = user_message(transcript, aspect_ratio)?;
        info!(model = %self.model, "requesting insertion decisions");

        let mut attempt = 0;
        let text = loop {
            match self.complete(&user_message).await {
                Err(Error::RateLimited(who)) if attempt < self.max_retries => {
                    attempt += 1;
                    let wait = self.backoff * attempt;
                    warn!(provider = %who, wait_secs = wait.as_secs(), "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                }
                other => break other?,
            }
        };
        debug!(response = %text, "model response");

        let decisions = postprocess(parse_response(&text)?, threshold, transcript.duration);
        info!(
            insertions = decisions.insertions.len(),
            rejected = decisions.rejected.len(),
            "analysis complete"
        );
        Ok(decisions)
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Read a system prompt from disk.
pub fn load_system_prompt(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::InvalidOption(format!(
            "prompt file not found: {}",
            path.display()
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// The JSON document sent as the user turn.
pub fn user_message(transcript: &Transcript, aspect_ratio: AspectRatio) -> Result<String> {
    let input = json!({
        "transcript": transcript.segments,
        "video_duration": transcript.duration,
        "aspect_ratio": aspect_ratio.as_str(),
        "language": transcript.language,
    });
    Ok(serde_json::to_string_pretty(&input)?)
}

/// Body of the first fenced block, if the text has one.
pub fn strip_code_fences(text: &str) -> &str {
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text.trim();
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Parse the model's answer into [`Decisions`].
///
/// Malformed or out-of-range items are logged and skipped. Only a response
/// that is not a JSON object at all is an error.
pub fn parse_response(text: &str) -> Result<Decisions> {
    let body = strip_code_fences(text);
    let mut value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::Llm(format!("invalid JSON response: {e}")))?;
    if !value.is_object() {
        return Err(Error::Llm("response is not a JSON object".into()));
    }

    let insertions = take_array(&mut value, "insertions")
        .into_iter()
        .filter_map(|item| {
            match serde_json::from_value::<InsertionDecision>(item) {
                Ok(d) => match d.check() {
                    Ok(()) => Some(d),
                    Err(e) => {
                        warn!(error = %e, "skipping insertion");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "failed to parse insertion");
                    None
                }
            }
        })
        .collect();

    let rejected = take_array(&mut value, "rejected")
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RejectedInsertion>(item) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "failed to parse rejection");
                None
            }
        })
        .collect();

    let metadata = value
        .get_mut("metadata")
        .map(serde_json::Value::take)
        .unwrap_or_else(|| json!({}));

    Ok(Decisions {
        insertions,
        rejected,
        metadata,
    })
}

fn take_array(value: &mut serde_json::Value, key: &str) -> Vec<serde_json::Value> {
    match value.get_mut(key).map(serde_json::Value::take) {
        Some(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Confidence threshold, then one insertion per 10 s, then video bounds.
pub fn postprocess(mut decisions: Decisions, threshold: f64, duration: f64) -> Decisions {
    let confident = validate::filter_confidence(&decisions.insertions, threshold);
    decisions.insertions = validate::validate(&confident, &SpacingRule::default(), duration);
    decisions
}
