//! 설정 모듈 - 전체 오케스트레이션 설정
//!
//! Ollama 연결, 벡터 저장소, RAG 파이프라인, 대화 캐시 설정을
//! 한 곳에서 관리합니다. 모든 설정은 환경변수로 덮어쓸 수 있습니다.

use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.allma-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".allma-rag")
}

/// 환경변수 파싱 헬퍼 (파싱 실패 시 기본값)
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ============================================================================
// Ollama
// ============================================================================

/// Ollama 연결 설정
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Ollama 서버 주소
    pub host: String,
    /// 생성용 LLM 모델
    pub model: String,
    /// 임베딩 모델
    pub embedding_model: String,
    /// 샘플링 온도
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// 컨텍스트 윈도우 크기
    pub num_ctx: u32,
    /// 최대 생성 토큰 수
    pub num_predict: u32,
    /// HTTP 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            num_ctx: 4096,
            num_predict: 1024,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    /// 환경변수에서 생성
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: env_string("OLLAMA_HOST", &default.host),
            model: env_string("OLLAMA_MODEL", &default.model),
            embedding_model: env_string("OLLAMA_EMBEDDING_MODEL", &default.embedding_model),
            temperature: env_parse("OLLAMA_TEMPERATURE", default.temperature),
            num_ctx: env_parse("OLLAMA_NUM_CTX", default.num_ctx),
            ..default
        }
    }
}

// ============================================================================
// Vector Store
// ============================================================================

/// 벡터 저장소 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    /// LanceDB (디스크 저장)
    Lance,
    /// 인메모리 (테스트/폴백)
    Memory,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lance" | "lancedb" => Ok(Self::Lance),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown vector backend: {other}")),
        }
    }
}

/// 벡터 저장소 설정
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub backend: VectorBackend,
    /// 데이터 디렉토리 (Lance 백엔드)
    pub data_dir: PathBuf,
    /// 테이블 이름
    pub table_name: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Lance,
            data_dir: get_data_dir(),
            table_name: "chunks".to_string(),
        }
    }
}

impl VectorStoreConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            backend: env_parse("VECTOR_STORE_TYPE", default.backend),
            data_dir: std::env::var("VECTOR_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.data_dir),
            table_name: env_string("VECTOR_STORE_TABLE", &default.table_name),
        }
    }
}

// ============================================================================
// RAG Pipeline
// ============================================================================

/// RAG 파이프라인 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// 청크 목표 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
    /// 기본 검색 결과 수
    pub top_k_results: usize,
    /// 유사도 임계값 (재순위 이후 적용)
    pub similarity_threshold: f32,
    /// 재순위(rerank) 사용 여부
    pub rerank_enabled: bool,
    /// 생성에 넘길 대화 히스토리 토큰 예산
    pub max_context_tokens: usize,
    /// 임베딩 캐시 최대 엔트리 수
    pub embedding_cache_size: usize,
    /// 배치 임베딩 동시성
    pub embedding_concurrency: usize,
    /// 시스템 프롬프트
    pub system_prompt: String,
    /// 컨텍스트 프롬프트 템플릿 ({context}, {question} 치환)
    pub context_prompt_template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k_results: 5,
            similarity_threshold: 0.7,
            rerank_enabled: true,
            max_context_tokens: 4000,
            embedding_cache_size: 1000,
            embedding_concurrency: 10,
            system_prompt: "You are a helpful AI assistant with access to a knowledge base. \
                            Use the provided context to answer questions accurately. \
                            If the context doesn't contain relevant information, say so honestly."
                .to_string(),
            context_prompt_template: "Based on the following context, please answer the question.\n\n\
                                      Context:\n{context}\n\n\
                                      Question: {question}\n\n\
                                      Answer:"
                .to_string(),
        }
    }
}

impl RagConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            chunk_size: env_parse("RAG_CHUNK_SIZE", default.chunk_size),
            chunk_overlap: env_parse("RAG_CHUNK_OVERLAP", default.chunk_overlap),
            top_k_results: env_parse("RAG_TOP_K", default.top_k_results),
            similarity_threshold: env_parse("RAG_SIMILARITY_THRESHOLD", default.similarity_threshold),
            rerank_enabled: env_parse("RAG_RERANK_ENABLED", default.rerank_enabled),
            max_context_tokens: env_parse("RAG_MAX_CONTEXT_TOKENS", default.max_context_tokens),
            embedding_cache_size: env_parse("RAG_EMBED_CACHE_SIZE", default.embedding_cache_size),
            embedding_concurrency: env_parse("RAG_EMBED_CONCURRENCY", default.embedding_concurrency),
            ..default
        }
    }
}

// ============================================================================
// Conversation Cache
// ============================================================================

/// 대화 캐시 설정
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// 동시 유지 가능한 최대 대화 수 (LRU)
    pub max_conversations: usize,
    /// 대화 당 최대 메시지 수
    pub max_messages_per_conversation: usize,
    /// 비활성 대화 TTL (시간)
    pub ttl_hours: i64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversations: 100,
            max_messages_per_conversation: 100,
            ttl_hours: 24,
        }
    }
}

impl ConversationConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_conversations: env_parse("CONV_MAX_CONVERSATIONS", default.max_conversations),
            max_messages_per_conversation: env_parse(
                "CONV_MAX_MESSAGES",
                default.max_messages_per_conversation,
            ),
            ttl_hours: env_parse("CONV_TTL_HOURS", default.ttl_hours),
        }
    }
}

// ============================================================================
// App Config
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub ollama: OllamaConfig,
    pub vector_store: VectorStoreConfig,
    pub rag: RagConfig,
    pub conversation: ConversationConfig,
}

impl AppConfig {
    /// 환경변수에서 전체 설정 생성
    pub fn from_env() -> Self {
        Self {
            ollama: OllamaConfig::from_env(),
            vector_store: VectorStoreConfig::from_env(),
            rag: RagConfig::from_env(),
            conversation: ConversationConfig::from_env(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
