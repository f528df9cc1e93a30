//! 벡터 인덱스 - 공통 트레이트 및 유틸리티
//!
//! 벡터 인덱스 백엔드가 구현해야 하는 최소 능력 집합입니다.
//! 물리적 저장 방식은 백엔드 소관이며, 코어는 이 계약만 의존합니다.
//! 검색 결과는 거리 오름차순이고, 코사인 거리 기준
//! `similarity = 1 - distance`로 변환합니다.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (key -> JSON value)
pub type Metadata = HashMap<String, serde_json::Value>;

/// 메타데이터 동등 비교 필터
pub type MetadataFilter = HashMap<String, serde_json::Value>;

/// 인덱스 저장 엔트리
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// 청크 ID (동일 ID 재삽입은 upsert)
    pub id: String,
    /// 청크 텍스트
    pub content: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    /// 메타데이터 (source, chunk_index 포함)
    pub metadata: Metadata,
}

/// 검색 결과 (거리 오름차순)
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// 코사인 거리 (0.0 = 동일)
    pub distance: f32,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 공통 인터페이스
///
/// 백엔드 장애(접속 불가, 손상된 인덱스)는 호출 중인 작업의 에러로
/// 표면화되어야 하며, 빈 결과로 조용히 격하되면 안 됩니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 엔트리 upsert (ID 기준). 삽입/갱신된 개수 반환
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize>;

    /// 최근접 이웃 검색 (거리 오름차순, 선택적 메타데이터 필터)
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// ID 목록으로 삭제. 삭제된 개수 반환
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 메타데이터 동등 비교로 삭제. 삭제된 개수 반환
    ///
    /// 백엔드가 지원하지 않는 필터 키는 0을 반환하는 대신
    /// 에러를 반환해야 합니다 (조용한 실패 방지).
    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize>;

    /// 저장된 전체 엔트리 수
    async fn count(&self) -> Result<usize>;

    /// 백엔드 이름 (로그/상태용)
    fn name(&self) -> &'static str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (0.0 = 동일)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// 거리 -> 유사도 변환 (코사인 거리 규약)
#[inline]
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_mismatched_len() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_distance_roundtrip() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let d = cosine_distance(&a, &b);
        assert!((similarity_from_distance(d) - cosine_similarity(&a, &b)).abs() < 1e-6);
    }
}
