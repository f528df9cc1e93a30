//! 재순위 - 벡터 유사도 + 키워드 중복 보너스
//!
//! 벡터 유사도 스코어에 쿼리/청크 간 단어 중복 보너스를 더해
//! 재정렬합니다. 보너스는 0.2로 제한되어 벡터 유사도가 항상
//! 주 신호로 남습니다.

use std::collections::HashSet;

use super::chunk::DocumentChunk;

/// 단어 하나당 보너스
const KEYWORD_BONUS_PER_TERM: f32 = 0.05;
/// 키워드 보너스 상한
const KEYWORD_BONUS_CAP: f32 = 0.2;

/// 검색 결과 재순위
///
/// `new_score = min(base + min(0.05 * overlap, 0.2), 1.0)`
///
/// 단어는 소문자화 후 공백 분리로 얻습니다 (형태소 분석 없음).
/// 정렬은 갱신된 스코어 내림차순 안정 정렬이라 동점은
/// 원래 순서(over-fetch 순서)를 유지합니다.
pub fn rerank(query: &str, chunks: &mut [DocumentChunk]) {
    let query_terms: HashSet<String> = terms(query);

    for chunk in chunks.iter_mut() {
        let chunk_terms = terms(&chunk.content);
        let overlap = query_terms.intersection(&chunk_terms).count();
        let bonus = (overlap as f32 * KEYWORD_BONUS_PER_TERM).min(KEYWORD_BONUS_CAP);

        chunk.score = (chunk.score + bonus).min(1.0);
    }

    // 안정 정렬 (동점은 입력 순서 유지)
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// 소문자 공백 분리 단어 집합
fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
