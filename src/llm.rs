//! Language-model backend
//!
//! The governor only needs "prompt in, text out". Failures are folded into
//! `None` at this boundary so callers treat them the same as an empty answer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Injected model callable
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Complete `prompt`. `None` means no usable answer.
    async fn invoke(&self, prompt: &str) -> Option<String>;
}

/// Ollama backend configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout: Duration::from_secs(60),
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Local Ollama `/api/generate` backend
pub struct OllamaBackend {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": self.config.temperature,
                    "num_predict": 512,
                }
            }))
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama error {}: {}", status, body);
        }

        let result: OllamaGenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(result.response.trim().to_string())
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn invoke(&self, prompt: &str) -> Option<String> {
        match self.generate(prompt).await {
            Ok(text) if text.is_empty() => {
                debug!("Model returned empty response");
                None
            }
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Model backend failed: {:#}", e);
                None
            }
        }
    }
}
