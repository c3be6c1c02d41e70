//! Gemini API completion backend
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AnalysisError;
use crate::llm::{CompletionModel, PromptSpec};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        if api_key.is_empty() {
            return Err(AnalysisError::ConfigError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent?key={}", BASE_URL, self.model, self.api_key)
    }
}

fn build_request(prompt: &PromptSpec) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.user.clone(),
            }],
        }],
        generation_config: GenerationConfig {
            // Grounded answers and verdicts must be reproducible
            temperature: 0.0,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
            response_mime_type: prompt.json_output.then(|| "application/json".to_string()),
        },
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: prompt.system.clone(),
            }],
        },
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &PromptSpec) -> crate::Result<String> {
        let request = build_request(prompt);

        info!(model = %self.model, purpose = %prompt.purpose, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    AnalysisError::CompletionTimeout(format!("Gemini request: {}", e))
                } else {
                    AnalysisError::LlmError(format!("Gemini API error: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(AnalysisError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AnalysisError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response
            .candidates
            .first()
            .ok_or_else(|| AnalysisError::LlmError("No response from Gemini API".to_string()))?;

        let answer: String = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();

        if answer.trim().is_empty() {
            return Err(AnalysisError::LlmError(format!(
                "Empty response from Gemini (finish_reason={:?})",
                candidate.finish_reason
            )));
        }

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}
