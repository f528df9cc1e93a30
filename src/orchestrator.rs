//! 오케스트레이터 - RAG 채팅 파이프라인 조립
//!
//! 임베딩, 벡터 인덱스, 검색 서비스, 대화 캐시, 생성 클라이언트를
//! 설정에 따라 조립하고 채팅 흐름을 운전합니다.
//!
//! 채팅 중 검색이 실패하면 에러 대신 컨텍스트 없이 진행합니다
//! (지식 베이스 장애가 대화 자체를 막지 않도록). 수집/검색을
//! 직접 호출하는 경로에서는 에러가 그대로 전파됩니다.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, VectorBackend};
use crate::conversation::{
    ConversationService, ConversationSnapshot, ConversationSummary, MessageRole,
};
use crate::embedding::{CachedEmbedder, EmbeddingProvider, OllamaEmbedding};
use crate::error::{RagError, Result};
use crate::generation::{OllamaGenerator, PromptMessage};
use crate::rag::{
    IndexStats, IngestReport, LanceVectorStore, MemoryVectorStore, Metadata, RagContext,
    RagService, VectorIndex,
};

// ============================================================================
// Types
// ============================================================================

/// 채팅 응답
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    /// 응답에 사용된 컨텍스트의 소스 목록
    pub sources: Vec<String>,
    pub model: String,
}

/// 시스템 상태
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub chunk_count: usize,
    pub vector_backend: &'static str,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub generation_model: String,
    pub active_conversations: usize,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// RAG 채팅 오케스트레이터
pub struct Orchestrator {
    config: AppConfig,
    rag: RagService,
    conversations: ConversationService,
    generator: OllamaGenerator,
}

impl Orchestrator {
    /// 설정으로 전체 파이프라인 조립
    ///
    /// 임베딩 모델을 한 번 호출해 차원을 확인한 뒤 그 차원으로
    /// 벡터 인덱스를 엽니다. Ollama가 죽어 있으면 여기서 실패합니다.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(CachedEmbedder::from_config(
            OllamaEmbedding::new(&config.ollama)?,
            &config.rag,
        ));

        let probe = embedder.embed("dimension probe").await?;
        let dimension = probe.len();

        let index: Arc<dyn VectorIndex> = match config.vector_store.backend {
            VectorBackend::Lance => {
                let path = config.vector_store.data_dir.join("vectors.lance");
                Arc::new(
                    LanceVectorStore::open(&path, &config.vector_store.table_name, dimension)
                        .await?,
                )
            }
            VectorBackend::Memory => Arc::new(MemoryVectorStore::new()),
        };

        info!(
            backend = index.name(),
            embedding_model = %config.ollama.embedding_model,
            model = %config.ollama.model,
            dimension,
            "orchestrator initialized"
        );

        let rag = RagService::with_dimension(config.rag.clone(), embedder, index, dimension);
        let conversations = ConversationService::new(config.conversation.clone())?;
        let generator = OllamaGenerator::new(&config.ollama)?;

        Ok(Self {
            config,
            rag,
            conversations,
            generator,
        })
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// RAG 채팅 한 턴 처리
    ///
    /// 1. 대화 조회/생성 (+시스템 프롬프트)
    /// 2. 컨텍스트 검색 (실패 시 컨텍스트 없이 격하)
    /// 3. 히스토리 + 증강된 질문으로 응답 생성
    /// 4. 원본 질문과 응답을 대화에 기록
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        use_rag: bool,
    ) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(RagError::InvalidInput("message must not be empty".to_string()));
        }

        // 주기적 TTL 정리
        self.conversations.evict_expired_default().await;

        let conv_id = self.conversations.get_or_create(conversation_id).await;

        let has_system = self
            .conversations
            .get(&conv_id)
            .await
            .map(|ctx| ctx.messages.iter().any(|m| m.role == MessageRole::System))
            .unwrap_or(false);
        if !has_system {
            self.conversations
                .set_system_message(&conv_id, self.config.rag.system_prompt.clone())
                .await?;
        }

        // 검색 실패는 격하: 컨텍스트 없이 계속
        let context = if use_rag {
            match self.rag.retrieve_context(message, None, None).await {
                Ok(ctx) if ctx.has_context() => Some(ctx),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "retrieval failed, continuing without context");
                    None
                }
            }
        } else {
            None
        };

        let prompt = match &context {
            Some(ctx) => build_prompt(
                &self.config.rag.context_prompt_template,
                &ctx.combined_text("\n\n---\n\n"),
                message,
            ),
            None => message.to_string(),
        };

        let mut messages = self
            .conversations
            .context_for_generation(&conv_id, self.config.rag.max_context_tokens)
            .await?;
        messages.push(PromptMessage::user(prompt));

        let content = self.generator.generate(&messages).await?;

        // 대화에는 증강 전 원본 질문을 기록
        self.conversations
            .append_message(&conv_id, MessageRole::User, message)
            .await?;
        self.conversations
            .append_message(&conv_id, MessageRole::Assistant, content.clone())
            .await?;

        let sources = context.map(|ctx| ctx.sources).unwrap_or_default();

        Ok(ChatReply {
            id: Uuid::new_v4().to_string(),
            conversation_id: conv_id,
            content,
            sources,
            model: self.generator.model().to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Knowledge Base
    // ------------------------------------------------------------------

    /// 텍스트 수집
    pub async fn ingest_text(
        &self,
        text: &str,
        source: &str,
        metadata: Metadata,
    ) -> Result<IngestReport> {
        self.rag.ingest_text(text, source, metadata).await
    }

    /// UTF-8 텍스트 파일 수집 (소스 = 파일명)
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RagError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;

        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        self.rag.ingest_text(&text, &source, Metadata::new()).await
    }

    /// 컨텍스트 검색 (채팅 없이)
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<RagContext> {
        self.rag.retrieve_context(query, top_k, None).await
    }

    /// 소스 문서 삭제
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        self.rag.delete_by_source(source).await
    }

    /// 시스템 상태
    pub async fn status(&self) -> Result<SystemStatus> {
        let stats: IndexStats = self.rag.stats().await?;
        Ok(SystemStatus {
            chunk_count: stats.chunk_count,
            vector_backend: stats.backend,
            embedding_model: stats.embedding_model,
            embedding_dimension: stats.embedding_dimension,
            generation_model: self.generator.model().to_string(),
            active_conversations: self.conversations.len().await,
        })
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn list_conversations(&self, limit: usize) -> Vec<ConversationSummary> {
        self.conversations.list(limit).await
    }

    pub async fn delete_conversation(&self, id: &str) -> bool {
        self.conversations.delete(id).await
    }

    pub async fn export_conversation(&self, id: &str) -> Result<ConversationSnapshot> {
        self.conversations.export(id).await
    }

    pub async fn import_conversation(&self, snapshot: ConversationSnapshot) -> Result<String> {
        self.conversations.import(snapshot).await
    }

    pub async fn clear_conversation(&self, id: &str, keep_system: bool) -> Result<()> {
        self.conversations.clear_history(id, keep_system).await
    }
}

/// 컨텍스트 프롬프트 조립 ({context}, {question} 치환)
fn build_prompt(template: &str, context: &str, question: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_substitution() {
        let prompt = build_prompt(
            "Context:\n{context}\n\nQuestion: {question}",
            "chunk text",
            "what is this?",
        );
        assert!(prompt.contains("chunk text"));
        assert!(prompt.contains("what is this?"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_build_prompt_with_default_template() {
        let config = crate::config::RagConfig::default();
        let prompt = build_prompt(&config.context_prompt_template, "ctx", "q");
        assert!(prompt.contains("ctx"));
        assert!(prompt.contains("q"));
    }
}
