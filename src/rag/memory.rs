//! 인메모리 벡터 인덱스
//!
//! `VectorIndex` 계약을 만족하는 독립 구현체입니다.
//! 테스트 더블 겸 LanceDB 없이 동작해야 할 때의 폴백으로 사용합니다.
//! 전수 탐색 코사인 거리 검색이라 소규모 데이터에만 적합합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

use super::vector::{cosine_distance, IndexEntry, MetadataFilter, SearchHit, VectorIndex};

// ============================================================================
// MemoryVectorStore
// ============================================================================

struct StoredEntry {
    /// 삽입 순번 (동점 거리의 결정적 정렬용)
    seq: u64,
    entry: IndexEntry,
}

/// 인메모리 벡터 저장소
pub struct MemoryVectorStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    next_seq: RwLock<u64>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: RwLock::new(0),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 필터의 모든 (키, 값) 쌍이 메타데이터와 일치하는지
fn matches_filter(metadata: &HashMap<String, serde_json::Value>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorIndex for MemoryVectorStore {
    async fn add(&self, new_entries: Vec<IndexEntry>) -> Result<usize> {
        let count = new_entries.len();
        let mut entries = self.entries.write().await;
        let mut next_seq = self.next_seq.write().await;

        for entry in new_entries {
            match entries.get_mut(&entry.id) {
                // upsert: 기존 순번 유지
                Some(stored) => stored.entry = entry,
                None => {
                    let seq = *next_seq;
                    *next_seq += 1;
                    entries.insert(entry.id.clone(), StoredEntry { seq, entry });
                }
            }
        }

        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(f32, u64, SearchHit)> = entries
            .values()
            .filter(|stored| {
                filter
                    .map(|f| matches_filter(&stored.entry.metadata, f))
                    .unwrap_or(true)
            })
            .map(|stored| {
                let distance = cosine_distance(query, &stored.entry.embedding);
                let hit = SearchHit {
                    id: stored.entry.id.clone(),
                    content: stored.entry.content.clone(),
                    metadata: stored.entry.metadata.clone(),
                    distance,
                };
                (distance, stored.seq, hit)
            })
            .collect();

        // 거리 오름차순, 동점은 삽입 순서
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(_, _, hit)| hit).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for id in ids {
            if entries.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, stored| !matches_filter(&stored.entry.metadata, filter));
        Ok(before - entries.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
