//! 임베딩 모듈 - Ollama를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 Ollama 임베딩 프로바이더와
//! 콘텐츠 해시 기반 임베딩 캐시를 제공합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OllamaEmbedding::new(&config.ollama)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{OllamaConfig, RagConfig};
use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
/// 배치 임베딩은 입력 순서를 보존해야 하며, 항목 하나라도
/// 실패하면 배치 전체가 실패합니다 (부분 결과 없음).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// Ollama 임베딩 구현체
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
pub struct OllamaEmbedding {
    host: String,
    model: String,
    client: reqwest::Client,
}

/// Ollama 임베딩 API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama 임베딩 API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::upstream("embedding", e))?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let url = format!("{}/api/embeddings", self.host);
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::upstream("embedding", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream {
                stage: "embedding",
                message: format!("ollama returned {status}: {body}"),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::upstream("embedding", e))?;

        if parsed.embedding.is_empty() {
            return Err(RagError::Upstream {
                stage: "embedding",
                message: "ollama returned an empty embedding".to_string(),
            });
        }

        Ok(parsed.embedding)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Cached Embedder
// ============================================================================

/// 임베딩 캐시 래퍼
///
/// 텍스트의 SHA-256 해시를 키로 사용하므로 내용이 완전히 같을 때만
/// 적중합니다. 캐시가 가득 차면 새 항목을 받지 않고 (축출 없음)
/// 미적중은 항상 내부 프로바이더로 위임됩니다.
pub struct CachedEmbedder<P: EmbeddingProvider> {
    inner: P,
    cache: Mutex<HashMap<String, Arc<Vec<f32>>>>,
    max_size: usize,
    concurrency: usize,
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {
    pub fn new(inner: P, max_size: usize, concurrency: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            max_size,
            concurrency: concurrency.max(1),
        }
    }

    /// 설정 기반 생성
    pub fn from_config(inner: P, config: &RagConfig) -> Self {
        Self::new(inner, config.embedding_cache_size, config.embedding_concurrency)
    }

    /// 현재 캐시 엔트리 수
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

/// 캐시 키 (텍스트의 SHA-256 hex)
fn cache_key(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = cache_key(text);

        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&key) {
                debug!("embedding cache hit");
                return Ok(cached.as_ref().clone());
            }
        }

        let embedding = self.inner.embed(text).await?;

        let mut cache = self.cache.lock().await;
        if cache.len() < self.max_size {
            cache.insert(key, Arc::new(embedding.clone()));
        }

        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // 동시 실행하되 입력 순서 보존
        let futures: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        stream::iter(futures)
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Tests
// ============================================================================
