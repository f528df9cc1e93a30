//! RAG 서비스 - 수집/검색 파이프라인
//!
//! 텍스트 수집(분할 -> 임베딩 -> 인덱싱)과 컨텍스트 검색
//! (임베딩 -> 벡터 검색 -> 재순위 -> 필터)을 담당하는 핵심 모듈입니다.
//!
//! 검색은 top_k의 2배를 over-fetch한 뒤 재순위를 거치고, 유사도
//! 임계값 필터는 재순위 이후에 적용됩니다. 키워드 보너스로
//! 임계값을 넘은 청크도 반환될 수 있습니다.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunk::{DocumentChunk, RagContext, RetrievalMetrics};
use super::rerank::rerank;
use super::splitter::{clean_text, TextSplitter};
use super::vector::{
    similarity_from_distance, IndexEntry, Metadata, MetadataFilter, SearchHit, VectorIndex,
};

// ============================================================================
// Types
// ============================================================================

/// 수집 결과 요약
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source: String,
    pub chunks_ingested: usize,
    pub embedding_dimension: usize,
}

/// 인덱스 상태 요약
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub backend: &'static str,
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

// ============================================================================
// RagService
// ============================================================================

/// RAG 파이프라인 서비스
///
/// 임베딩 프로바이더와 벡터 인덱스는 생성 시 주입됩니다.
pub struct RagService {
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    dimension: usize,
}

impl RagService {
    /// 서비스 초기화
    ///
    /// 프로브 텍스트를 한 번 임베딩하여 모델의 차원을 확인합니다.
    /// 임베딩 백엔드가 죽어 있으면 여기서 바로 실패합니다.
    pub async fn initialize(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let probe = embedder.embed("dimension probe").await?;
        let dimension = probe.len();

        info!(
            model = embedder.name(),
            dimension,
            backend = index.name(),
            "rag service initialized"
        );

        Ok(Self {
            config,
            embedder,
            index,
            dimension,
        })
    }

    /// 주입된 차원으로 생성 (프로브 생략, 테스트 및 재구성용)
    pub fn with_dimension(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        dimension: usize,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
            dimension,
        }
    }

    /// 임베딩 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// 원문 텍스트 수집
    ///
    /// 정규화 -> 분할 -> 임베딩 -> 인덱싱 순서로 진행합니다.
    /// 청크 ID는 (source, index, content)에서 결정되므로 같은 문서를
    /// 다시 수집해도 중복이 생기지 않습니다.
    pub async fn ingest_text(
        &self,
        text: &str,
        source: &str,
        metadata: Metadata,
    ) -> Result<IngestReport> {
        if source.trim().is_empty() {
            return Err(RagError::InvalidInput("source must not be empty".to_string()));
        }

        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Err(RagError::InvalidInput(format!(
                "document '{source}' has no content after normalization"
            )));
        }

        let splitter = TextSplitter::with_defaults(self.config.chunk_size, self.config.chunk_overlap)?;
        let pieces = splitter.split(&cleaned);

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(i, content)| DocumentChunk::new(content, source, i, metadata.clone()))
            .collect();

        self.ingest_chunks(chunks).await
    }

    /// 준비된 청크 수집
    ///
    /// 배치 전체를 임베딩한 뒤 한 번에 인덱스에 커밋합니다.
    /// 임베딩이 하나라도 실패하면 아무것도 커밋되지 않습니다.
    pub async fn ingest_chunks(&self, mut chunks: Vec<DocumentChunk>) -> Result<IngestReport> {
        if chunks.is_empty() {
            return Err(RagError::InvalidInput(
                "no chunks to ingest".to_string(),
            ));
        }

        let source = chunks[0].source.clone();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let embeddings = self.embedder.embed_batch(&texts).await?;

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            if embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            chunk.embedding = Some(embedding);
        }

        let entries: Vec<IndexEntry> = chunks.iter().map(chunk_to_entry).collect();
        let count = self.index.add(entries).await?;

        info!(source = %source, chunks = count, "ingested document");

        Ok(IngestReport {
            source,
            chunks_ingested: count,
            embedding_dimension: self.dimension,
        })
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// 쿼리에 대한 컨텍스트 검색
    ///
    /// `top_k`가 None이면 설정값을 사용합니다. 백엔드 장애는 에러로
    /// 전파되며, 결과 없음(빈 청크 목록)과 구분됩니다.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<RagContext> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }

        let top_k = top_k.unwrap_or(self.config.top_k_results).max(1);
        let total_start = Instant::now();

        // 1. 쿼리 임베딩
        let embed_start = Instant::now();
        let query_embedding = self.embedder.embed(query).await?;
        let embedding_time_ms = embed_start.elapsed().as_secs_f64() * 1000.0;

        // 2. 벡터 검색 (재순위 여지를 위해 2배 over-fetch)
        let search_start = Instant::now();
        let hits = self
            .index
            .search(&query_embedding, top_k * 2, filter)
            .await?;
        let search_time_ms = search_start.elapsed().as_secs_f64() * 1000.0;
        let chunks_retrieved = hits.len();

        let mut chunks: Vec<DocumentChunk> = hits.into_iter().map(hit_to_chunk).collect();

        // 3. 재순위 (키워드 보너스)
        let rerank_start = Instant::now();
        if self.config.rerank_enabled {
            rerank(query, &mut chunks);
        }
        let rerank_time_ms = rerank_start.elapsed().as_secs_f64() * 1000.0;

        // 4. 임계값 필터 + top_k 절단 (재순위 순서 유지)
        chunks.retain(|c| c.score >= self.config.similarity_threshold);
        chunks.truncate(top_k);

        // 5. 소스 목록 (등장 순서 유지, 중복 제거)
        let mut sources = Vec::new();
        for chunk in &chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }

        let metrics = RetrievalMetrics {
            embedding_time_ms,
            search_time_ms,
            rerank_time_ms,
            total_time_ms: total_start.elapsed().as_secs_f64() * 1000.0,
            chunks_retrieved,
            chunks_returned: chunks.len(),
        };

        debug!(
            query_len = query.len(),
            retrieved = metrics.chunks_retrieved,
            returned = metrics.chunks_returned,
            total_ms = metrics.total_time_ms,
            "retrieval complete"
        );

        Ok(RagContext {
            query: query.to_string(),
            chunks,
            sources,
            metrics,
        })
    }

    // ------------------------------------------------------------------
    // Management
    // ------------------------------------------------------------------

    /// 소스 문서의 전체 청크 삭제
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        if source.trim().is_empty() {
            return Err(RagError::InvalidInput("source must not be empty".to_string()));
        }

        let mut filter = MetadataFilter::new();
        filter.insert("source".to_string(), serde_json::json!(source));

        let deleted = self.index.delete_by_metadata(&filter).await?;
        info!(source = %source, deleted, "deleted document chunks");
        Ok(deleted)
    }

    /// 인덱스 상태 조회
    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            chunk_count: self.index.count().await?,
            backend: self.index.name(),
            embedding_model: self.embedder.name().to_string(),
            embedding_dimension: self.dimension,
        })
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// 청크를 인덱스 엔트리로 변환 (source, chunk_index를 메타데이터에 승격)
fn chunk_to_entry(chunk: &DocumentChunk) -> IndexEntry {
    let mut metadata = chunk.metadata.clone();
    metadata.insert("source".to_string(), serde_json::json!(chunk.source));
    metadata.insert("chunk_index".to_string(), serde_json::json!(chunk.chunk_index));

    IndexEntry {
        id: chunk.id.clone(),
        content: chunk.content.clone(),
        embedding: chunk.embedding.clone().unwrap_or_default(),
        metadata,
    }
}

/// 검색 결과를 청크로 복원 (score = 1 - distance)
fn hit_to_chunk(hit: SearchHit) -> DocumentChunk {
    let source = hit
        .metadata
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let chunk_index = hit
        .metadata
        .get("chunk_index")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    DocumentChunk {
        id: hit.id,
        content: hit.content,
        source,
        chunk_index,
        embedding: None,
        score: similarity_from_distance(hit.distance),
        metadata: hit.metadata,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::memory::MemoryVectorStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// 고정 매핑 임베딩 (테스트용)
    struct StubEmbedder {
        mapping: HashMap<String, Vec<f32>>,
    }

    impl StubEmbedder {
        fn new(pairs: &[(&str, [f32; 3])]) -> Self {
            let mapping = pairs
                .iter()
                .map(|(text, vec)| (text.to_string(), vec.to_vec()))
                .collect();
            Self { mapping }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .mapping
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.577, 0.577, 0.577]))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn test_config(chunk_size: usize, overlap: usize) -> RagConfig {
        RagConfig {
            chunk_size,
            chunk_overlap: overlap,
            top_k_results: 5,
            similarity_threshold: 0.7,
            rerank_enabled: true,
            ..RagConfig::default()
        }
    }

    fn service(config: RagConfig, embedder: StubEmbedder) -> (RagService, Arc<MemoryVectorStore>) {
        let index = Arc::new(MemoryVectorStore::new());
        let service = RagService::with_dimension(config, Arc::new(embedder), index.clone(), 3);
        (service, index)
    }

    #[tokio::test]
    async fn test_initialize_probes_dimension() {
        let embedder = Arc::new(StubEmbedder::new(&[]));
        let index = Arc::new(MemoryVectorStore::new());
        let service = RagService::initialize(test_config(1000, 200), embedder, index)
            .await
            .unwrap();
        assert_eq!(service.dimension(), 3);
    }

    #[tokio::test]
    async fn test_ingest_and_retrieve_end_to_end() {
        let embedder = StubEmbedder::new(&[
            ("A", [1.0, 0.0, 0.0]),
            ("B", [0.0, 1.0, 0.0]),
            ("C.", [0.0, 0.0, 1.0]),
        ]);
        let (service, index) = service(test_config(4, 0), embedder);

        let report = service
            .ingest_text("A. B. C.", "doc.md", Metadata::new())
            .await
            .unwrap();
        assert_eq!(report.chunks_ingested, 3);
        assert_eq!(index.count().await.unwrap(), 3);

        // "B"와 정확히 일치하는 쿼리는 B 청크만 임계값을 넘김
        let ctx = service.retrieve_context("B", None, None).await.unwrap();
        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].content, "B");
        assert_eq!(ctx.sources, vec!["doc.md".to_string()]);
        assert!(ctx.has_context());
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let embedder = StubEmbedder::new(&[]);
        let (service, index) = service(test_config(1000, 200), embedder);

        service
            .ingest_text("Some document content here.", "doc.md", Metadata::new())
            .await
            .unwrap();
        let count_first = index.count().await.unwrap();

        service
            .ingest_text("Some document content here.", "doc.md", Metadata::new())
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), count_first);
    }

    #[tokio::test]
    async fn test_threshold_applied_after_rerank() {
        // 기본 유사도 0.68은 임계값 0.7 미달이지만
        // 키워드 중복 보너스(+0.05)로 임계값을 넘어 반환되어야 함
        let embedder = StubEmbedder::new(&[("keyword question", [1.0, 0.0, 0.0])]);
        let (service, index) = service(test_config(1000, 200), embedder);

        index
            .add(vec![IndexEntry {
                id: "doc_0_x".to_string(),
                content: "keyword match content".to_string(),
                embedding: vec![0.68, 0.7332, 0.0],
                metadata: {
                    let mut m = Metadata::new();
                    m.insert("source".to_string(), serde_json::json!("doc"));
                    m.insert("chunk_index".to_string(), serde_json::json!(0));
                    m
                },
            }])
            .await
            .unwrap();

        let ctx = service
            .retrieve_context("keyword question", None, None)
            .await
            .unwrap();
        assert_eq!(ctx.chunks.len(), 1);
        assert!(ctx.chunks[0].score >= 0.7);
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_hits() {
        let embedder = StubEmbedder::new(&[("zz", [1.0, 0.0, 0.0])]);
        let (service, index) = service(test_config(1000, 200), embedder);

        // 직교 벡터, 단어 중복 없음 -> 유사도 0.0
        index
            .add(vec![IndexEntry {
                id: "doc_0_y".to_string(),
                content: "unrelated".to_string(),
                embedding: vec![0.0, 1.0, 0.0],
                metadata: Metadata::new(),
            }])
            .await
            .unwrap();

        let ctx = service.retrieve_context("zz", None, None).await.unwrap();
        assert!(ctx.chunks.is_empty());
        assert!(!ctx.has_context());
        assert_eq!(ctx.metrics.chunks_retrieved, 1);
        assert_eq!(ctx.metrics.chunks_returned, 0);
    }

    #[tokio::test]
    async fn test_top_k_cap() {
        let embedder = StubEmbedder::new(&[("q", [1.0, 0.0, 0.0])]);
        let (service, index) = service(test_config(1000, 200), embedder);

        let entries: Vec<IndexEntry> = (0..6)
            .map(|i| IndexEntry {
                id: format!("doc_{i}"),
                content: format!("chunk {i}"),
                embedding: vec![1.0, 0.001 * i as f32, 0.0],
                metadata: Metadata::new(),
            })
            .collect();
        index.add(entries).await.unwrap();

        let ctx = service.retrieve_context("q", Some(2), None).await.unwrap();
        assert_eq!(ctx.chunks.len(), 2);
        // over-fetch는 2배까지
        assert!(ctx.metrics.chunks_retrieved <= 4);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (service, _) = service(test_config(1000, 200), StubEmbedder::new(&[]));
        let result = service.retrieve_context("   ", None, None).await;
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let (service, _) = service(test_config(1000, 200), StubEmbedder::new(&[]));
        let result = service.ingest_text("  \n\n  ", "doc.md", Metadata::new()).await;
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let embedder = StubEmbedder::new(&[]);
        let (service, index) = service(test_config(1000, 200), embedder);

        service
            .ingest_text("Document one text.", "doc1.md", Metadata::new())
            .await
            .unwrap();
        service
            .ingest_text("Document two text.", "doc2.md", Metadata::new())
            .await
            .unwrap();

        let deleted = service.delete_by_source("doc1.md").await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let embedder = StubEmbedder::new(&[]);
        let (service, _) = service(test_config(1000, 200), embedder);

        service
            .ingest_text("Hello world.", "doc.md", Metadata::new())
            .await
            .unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.embedding_dimension, 3);
    }

    #[tokio::test]
    async fn test_metrics_populated() {
        let embedder = StubEmbedder::new(&[("q", [1.0, 0.0, 0.0])]);
        let (service, index) = service(test_config(1000, 200), embedder);

        index
            .add(vec![IndexEntry {
                id: "a".to_string(),
                content: "q".to_string(),
                embedding: vec![1.0, 0.0, 0.0],
                metadata: Metadata::new(),
            }])
            .await
            .unwrap();

        let ctx = service.retrieve_context("q", None, None).await.unwrap();
        assert!(ctx.metrics.total_time_ms >= 0.0);
        assert_eq!(ctx.metrics.chunks_returned, 1);
    }
}
