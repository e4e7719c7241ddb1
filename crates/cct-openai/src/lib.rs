//! OpenAI adapter (note summarization).
//!
//! Turns dictated caregiver text into short, tidy resident notes via the
//! chat completions endpoint. Constructed only when an API key is
//! configured; callers fall back to storing the raw text otherwise.

use cct_core::{errors::Error, Result};

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes spoken text into concise, well-formatted notes.";

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    pub api_key: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client build");
        Self {
            api_key: api_key.into(),
            http,
        }
    }

    pub async fn summarize_text(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok("No text to summarize.".to_string());
        }

        let body = serde_json::json!({
            "model": "gpt-3.5-turbo",
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": format!(
                        "Please summarize and refine the following spoken text into concise notes:\n\n{text}"
                    ),
                },
            ],
            "max_tokens": 100,
            "temperature": 0.5,
        });

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openai summarization failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("openai json error: {e}")))?;

        let summary = v
            .pointer("/choices/0/message/content")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        if summary.is_empty() {
            return Err(Error::External(
                "openai summarization returned empty text".to_string(),
            ));
        }

        Ok(summary)
    }
}
