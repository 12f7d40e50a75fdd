use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Text generation collaborator.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Generative Language `generateContent` over REST.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("build gemini http client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn first_text(resp: GenerateResponse) -> anyhow::Result<String> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    anyhow::ensure!(!text.trim().is_empty(), "model returned no text");
    Ok(text)
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{GEMINI_BASE}/{}:generateContent", self.model);
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "contents": [{ "role": "user", "parts": [{ "text": prompt }] }] }))
            .send()
            .await
            .context("generateContent request")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("generateContent returned HTTP {status}");
        }
        let body: GenerateResponse = resp.json().await.context("decode generateContent")?;
        let text = first_text(body)?;
        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_parts_of_first_candidate() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Idea 1. " }, { "text": "Idea 2." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(first_text(body).unwrap(), "Idea 1. Idea 2.");
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let body: GenerateResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(first_text(body).is_err());
        let body: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(first_text(body).is_err());
    }
}
