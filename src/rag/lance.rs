//! LanceDB 벡터 인덱스 - 디스크 영속 벡터 검색
//!
//! ANN (Approximate Nearest Neighbor) 검색으로 대용량 벡터에서도 빠른 검색을 지원합니다.
//! ref: https://lancedb.github.io/lancedb/
//!
//! 코사인 거리 기준으로 검색하며, `_distance` 컬럼을 그대로 노출합니다.
//! 동일 ID 재삽입은 삭제 후 삽입(upsert)으로 처리됩니다.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tracing::debug;

use crate::error::{RagError, Result};

use super::vector::{IndexEntry, Metadata, MetadataFilter, SearchHit, VectorIndex};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// LanceDB는 고성능 벡터 검색을 위한 columnar 데이터베이스입니다.
/// Apache Arrow 기반으로 빠른 읽기/쓰기를 제공합니다.
/// 임베딩 차원은 생성 시점에 고정되며 스키마에 반영됩니다.
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `table_name` - 청크 테이블 이름
    /// * `dimension` - 임베딩 차원 (임베딩 모델에 의해 결정)
    pub async fn open(path: &Path, table_name: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be positive".to_string(),
            ));
        }

        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RagError::upstream("vector_store", e))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::InvalidInput("invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        Ok(Self {
            db,
            table_name: table_name.to_string(),
            dimension: dimension as i32,
        })
    }

    /// 청크 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            // 구조화되지 않은 추가 메타데이터는 JSON 문자열로 보관
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            return Err(RagError::InvalidInput(
                "cannot create batch from empty entries".to_string(),
            ));
        }

        for entry in entries {
            if entry.embedding.len() != self.dimension as usize {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension as usize,
                    actual: entry.embedding.len(),
                });
            }
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        let sources: Vec<String> = entries.iter().map(|e| metadata_source(&e.metadata)).collect();
        let chunk_indices: Vec<i32> = entries
            .iter()
            .map(|e| metadata_chunk_index(&e.metadata))
            .collect();
        let metadata_json: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.metadata).unwrap_or_else(|_| "{}".to_string()))
            .collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::upstream("vector_store", e))?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(metadata_json)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| RagError::upstream("vector_store", e))?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;
        Ok(names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::upstream("vector_store", e))
    }
}

/// 메타데이터에서 source 추출 (없으면 빈 문자열)
fn metadata_source(metadata: &Metadata) -> String {
    metadata
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// 메타데이터에서 chunk_index 추출 (없으면 0)
fn metadata_chunk_index(metadata: &Metadata) -> i32 {
    metadata
        .get("chunk_index")
        .and_then(|v| v.as_i64())
        .unwrap_or(0) as i32
}

/// SQL 문자열 리터럴 이스케이프 (작은따옴표 중복)
fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

/// 메타데이터 필터를 SQL 조건식으로 변환
///
/// 컬럼으로 승격된 키(source, chunk_index)만 지원합니다.
/// 그 외 키는 조용히 무시하는 대신 에러를 반환합니다.
fn filter_to_predicate(filter: &MetadataFilter) -> Result<String> {
    let mut clauses = Vec::with_capacity(filter.len());

    let mut keys: Vec<&String> = filter.keys().collect();
    keys.sort();

    for key in keys {
        let value = &filter[key];
        match key.as_str() {
            "source" => {
                let s = value.as_str().ok_or_else(|| {
                    RagError::InvalidInput("source filter must be a string".to_string())
                })?;
                clauses.push(format!("source = '{}'", escape_sql(s)));
            }
            "chunk_index" => {
                let n = value.as_i64().ok_or_else(|| {
                    RagError::InvalidInput("chunk_index filter must be an integer".to_string())
                })?;
                clauses.push(format!("chunk_index = {n}"));
            }
            other => {
                return Err(RagError::InvalidInput(format!(
                    "unsupported metadata filter key for lancedb backend: {other}"
                )));
            }
        }
    }

    if clauses.is_empty() {
        return Err(RagError::InvalidInput(
            "metadata filter must not be empty".to_string(),
        ));
    }

    Ok(clauses.join(" AND "))
}

#[async_trait]
impl VectorIndex for LanceVectorStore {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(&entries)?;
        let schema = batch.schema();

        if self.table_exists().await? {
            let table = self.open_table().await?;

            // ID 기준 원자적 upsert. 삭제 후 삽입으로 쪼개면 중간 실패 시
            // 기존 행까지 사라지므로 단일 merge_insert 커밋을 사용
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            let mut merge = table.merge_insert(&["id"]);
            merge
                .when_matched_update_all(None)
                .when_not_matched_insert_all();
            merge
                .execute(Box::new(batches))
                .await
                .map_err(|e| RagError::upstream("vector_store", e))?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(&self.table_name, batches)
                .execute()
                .await
                .map_err(|e| RagError::upstream("vector_store", e))?;
            debug!(table = %self.table_name, "created lancedb table");
        }

        Ok(entries.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension as usize {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension as usize,
                actual: query.len(),
            });
        }

        if !self.table_exists().await? {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;

        let mut search = table
            .vector_search(query.to_vec())
            .map_err(|e| RagError::upstream("vector_store", e))?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(f) = filter {
            search = search.only_if(filter_to_predicate(f)?);
        }

        let results = search
            .execute()
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        let mut hits = Vec::new();

        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let contents = string_column(&batch, "content")?;
            let metadata_json = string_column(&batch, "metadata")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| {
                    RagError::upstream("vector_store", "missing _distance column")
                })?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata =
                    serde_json::from_str(metadata_json.value(i)).unwrap_or_default();

                hits.push(SearchHit {
                    id: ids.value(i).to_string(),
                    content: contents.value(i).to_string(),
                    metadata,
                    distance: distances.value(i),
                });
            }
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() || !self.table_exists().await? {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let before = self.count().await?;

        let id_list: Vec<String> = ids
            .iter()
            .map(|id| format!("'{}'", escape_sql(id)))
            .collect();
        let predicate = format!("id IN ({})", id_list.join(", "));
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        let after = self.count().await?;
        Ok(before.saturating_sub(after))
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize> {
        let predicate = filter_to_predicate(filter)?;

        if !self.table_exists().await? {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let before = self.count().await?;

        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::upstream("vector_store", e))?;

        let after = self.count().await?;
        Ok(before.saturating_sub(after))
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::upstream("vector_store", e))
    }

    fn name(&self) -> &'static str {
        "lancedb"
    }
}

/// RecordBatch에서 문자열 컬럼 추출
fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::upstream("vector_store", format!("missing {name} column")))
}

// ============================================================================
// Tests
// ============================================================================
