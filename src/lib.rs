//! allma-rag - 로컬 RAG 채팅 오케스트레이터
//!
//! Ollama 임베딩/생성과 LanceDB 벡터 검색을 결합한
//! 로컬 RAG 파이프라인입니다. 문서 분할, 임베딩 캐시,
//! 재순위 검색, LRU 대화 캐시를 제공합니다.

pub mod cli;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod rag;

// Re-exports
pub use config::{get_data_dir, AppConfig, ConversationConfig, OllamaConfig, RagConfig, VectorBackend, VectorStoreConfig};
pub use conversation::{
    ChatMessage, ConversationContext, ConversationService, ConversationSnapshot,
    ConversationStats, ConversationSummary, MessageRole,
};
pub use embedding::{CachedEmbedder, EmbeddingProvider, OllamaEmbedding};
pub use error::{RagError, Result};
pub use generation::{OllamaGenerator, PromptMessage};
pub use orchestrator::{ChatReply, Orchestrator, SystemStatus};
pub use rag::{
    clean_text, chunk_id, DocumentChunk, IndexEntry, IndexStats, IngestReport, LanceVectorStore,
    MemoryVectorStore, Metadata, MetadataFilter, RagContext, RagService, RetrievalMetrics,
    SearchHit, TextSplitter, VectorIndex,
};
