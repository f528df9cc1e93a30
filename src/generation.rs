//! 생성 모듈 - Ollama 채팅 완성 클라이언트
//!
//! RAG 컨텍스트와 대화 히스토리를 합친 메시지 목록을
//! Ollama `/api/chat` 엔드포인트로 보내 응답을 생성합니다.
//! 스트리밍 없이 완성된 응답만 받습니다.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OllamaConfig;
use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// LLM에 전달하는 메시지 (role: system / user / assistant)
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Ollama 채팅 API 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_ctx: u32,
    num_predict: u32,
}

/// Ollama 채팅 API 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

// ============================================================================
// OllamaGenerator
// ============================================================================

/// Ollama 생성 클라이언트
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion
pub struct OllamaGenerator {
    host: String,
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::upstream("generation", e))?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            config: config.clone(),
            client,
        })
    }

    /// 사용 중인 모델 이름
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// 메시지 목록으로 응답 생성
    pub async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        if messages.is_empty() {
            return Err(RagError::InvalidInput(
                "cannot generate from empty message list".to_string(),
            ));
        }

        let url = format!("{}/api/chat", self.host);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                num_ctx: self.config.num_ctx,
                num_predict: self.config.num_predict,
            },
        };

        debug!(model = %self.config.model, messages = messages.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::upstream("generation", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream {
                stage: "generation",
                message: format!("ollama returned {status}: {body}"),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::upstream("generation", e))?;

        Ok(parsed.message.content)
    }
}

// ============================================================================
// Tests
// ============================================================================
