//! 청크 데이터 모델
//!
//! 문서 분할 결과인 청크와 검색 결과 컨텍스트 타입을 정의합니다.
//! 청크 ID는 (source, index, content-hash)로 결정되어
//! 동일한 내용을 재수집해도 같은 ID가 나옵니다 (멱등 수집).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Types
// ============================================================================

/// 문서 청크 - 임베딩/검색의 기본 단위
///
/// `embedding`은 수집 시점에, `score`는 검색 시점에만 채워집니다.
/// `score`는 일시적 주석이며 저장되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// 청크 고유 ID: `{source}_{index}_{content_hash[..8]}`
    pub id: String,
    /// 청크 텍스트
    pub content: String,
    /// 소스 문서 식별자
    pub source: String,
    /// 소스 내 청크 순번 (0-based)
    pub chunk_index: usize,
    /// 임베딩 벡터 (수집 시 생성)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// 유사도 스코어 (검색 시에만 유효, 저장 안 됨)
    #[serde(default)]
    pub score: f32,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DocumentChunk {
    /// 새 청크 생성 (ID 자동 계산)
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        chunk_index: usize,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let content = content.into();
        let source = source.into();
        let id = chunk_id(&source, chunk_index, &content);

        Self {
            id,
            content,
            source,
            chunk_index,
            embedding: None,
            score: 0.0,
            metadata,
        }
    }
}

/// 청크 ID 생성
///
/// 콘텐츠의 SHA-256 앞 8자리 hex를 사용합니다.
/// 동일 (source, index, content)는 항상 동일 ID를 생성합니다.
pub fn chunk_id(source: &str, index: usize, content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    let prefix: String = hash.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{source}_{index}_{prefix}")
}

// ============================================================================
// Retrieval Context
// ============================================================================

/// 단일 검색 호출의 단계별 측정값
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalMetrics {
    pub embedding_time_ms: f64,
    pub search_time_ms: f64,
    pub rerank_time_ms: f64,
    pub total_time_ms: f64,
    /// 벡터 인덱스에서 가져온 후보 수 (over-fetch 포함)
    pub chunks_retrieved: usize,
    /// 임계값/top-k 필터 후 반환된 수
    pub chunks_returned: usize,
}

/// RAG 검색 결과 컨텍스트
///
/// 쿼리 하나에 대해 생성되는 일시적 구조체입니다. 호출자가 소유합니다.
#[derive(Debug, Clone, Serialize)]
pub struct RagContext {
    pub query: String,
    /// 재순위/필터 후 순서가 유지된 청크
    pub chunks: Vec<DocumentChunk>,
    /// 중복 제거된 소스 목록 (청크 등장 순서 유지)
    pub sources: Vec<String>,
    pub metrics: RetrievalMetrics,
}

impl RagContext {
    /// 검색된 컨텍스트가 있는지 확인
    pub fn has_context(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// 전체 청크 텍스트 결합
    pub fn combined_text(&self, separator: &str) -> String {
        self.chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

// ============================================================================
// Tests
// ============================================================================
