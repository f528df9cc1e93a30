//! 에러 타입 - RAG 코어 공통 에러 분류
//!
//! 검색/수집 파이프라인이 반환하는 타입화된 에러입니다.
//! 어느 단계(stage)에서 실패했는지를 보존하여 호출자가
//! 사용자 메시지를 결정할 수 있게 합니다.

use thiserror::Error;

/// RAG 코어 Result 별칭
pub type Result<T> = std::result::Result<T, RagError>;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 입력 (빈 문서, chunk_size <= 0 등) - 재시도 없이 즉시 반환
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 외부 서비스 에러 (임베딩 서비스 / 벡터 인덱스 접근 실패)
    ///
    /// 코어는 자동 재시도하지 않습니다. 재시도 정책은 어댑터 몫입니다.
    #[error("{stage} error: {message}")]
    Upstream {
        /// 실패한 단계 (embedding, vector-index, generation)
        stage: &'static str,
        message: String,
    },

    /// 존재하지 않는 대화/소스 참조
    #[error("not found: {0}")]
    NotFound(String),

    /// 임베딩 차원 불일치 (라이브 인덱스의 차원 변경은 에러)
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl RagError {
    /// 외부 서비스 에러 생성 헬퍼
    pub fn upstream(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            stage,
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
