//! RAG 모듈 - 분할, 인덱싱, 검색 파이프라인
//!
//! 문서를 청크로 분할하고 벡터 인덱스에 저장한 뒤,
//! 쿼리와 유사한 청크를 재순위와 함께 검색합니다.

pub mod chunk;
pub mod lance;
pub mod memory;
pub mod rerank;
pub mod service;
pub mod splitter;
pub mod vector;

pub use chunk::{chunk_id, DocumentChunk, RagContext, RetrievalMetrics};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use service::{IndexStats, IngestReport, RagService};
pub use splitter::{clean_text, TextSplitter};
pub use vector::{
    cosine_similarity, IndexEntry, Metadata, MetadataFilter, SearchHit, VectorIndex,
};
