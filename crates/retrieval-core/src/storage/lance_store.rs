use super::{Filter, VectorEntry, VectorStore};
use crate::error::{CoreError, CoreResult};
use crate::types::{ChunkMetadata, SearchHit};
use anyhow::{Context, Result};
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Embedded LanceDB-backed implementation of `VectorStore`. Each named
/// collection is its own Arrow table under the shared database directory;
/// table handles are opened lazily and cached behind a single mutex so
/// concurrent first-use never double-creates a table.
pub struct LanceVectorStore {
    db: lancedb::Connection,
    dimension: usize,
    tables: Mutex<HashMap<String, lancedb::Table>>,
}

impl LanceVectorStore {
    pub async fn open(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("connecting to LanceDB database")?;
        Ok(Self {
            db,
            dimension,
            tables: Mutex::new(HashMap::new()),
        })
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("metadata_json", DataType::Utf8, false),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn table_for(&self, name: &str) -> Result<lancedb::Table> {
        let mut tables = self.tables.lock().await;
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }

        let existing = self.db.table_names().execute().await?;
        let table = if existing.contains(&name.to_string()) {
            self.db.open_table(name).execute().await?
        } else {
            let schema = self.schema();
            let empty = RecordBatchIterator::new(Vec::<Result<RecordBatch, arrow_schema::ArrowError>>::new(), schema.clone());
            self.db
                .create_table(name, Box::new(empty))
                .execute()
                .await
                .with_context(|| format!("creating collection table '{name}'"))?
        };
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    fn build_batch(&self, items: &[VectorEntry]) -> Result<RecordBatch> {
        let ids: Vec<&str> = items.iter().map(|c| c.id.as_str()).collect();
        let documents: Vec<&str> = items.iter().map(|c| c.document.as_str()).collect();
        let metadata_jsons: Vec<String> = items
            .iter()
            .map(|c| serde_json::to_string(&c.metadata).unwrap_or_else(|_| "{}".to_string()))
            .collect();
        let created_ats: Vec<i64> = items
            .iter()
            .map(|c| {
                c.metadata
                    .get("created_at")
                    .or_else(|| c.metadata.get("processed_at"))
                    .or_else(|| c.metadata.get("timestamp"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
            })
            .collect();

        let flat_vectors: Vec<f32> = items.iter().flat_map(|c| c.vector.iter().copied()).collect();
        let vector_values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(vector_values) as Arc<dyn Array>,
            None,
        );

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(documents)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(metadata_jsons)),
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .context("building record batch")
    }

    fn store_err(collection: &str, err: impl std::fmt::Display) -> CoreError {
        CoreError::VectorStoreError {
            collection: collection.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn ensure_collection(&self, name: &str) -> CoreResult<()> {
        self.table_for(name)
            .await
            .map(|_| ())
            .map_err(|e| Self::store_err(name, e))
    }

    async fn add(&self, name: &str, items: Vec<VectorEntry>) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let table = self.table_for(name).await.map_err(|e| Self::store_err(name, e))?;
        let batch = self.build_batch(&items).map_err(|e| Self::store_err(name, e))?;
        let schema = self.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| Self::store_err(name, e))?;
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> CoreResult<Vec<SearchHit>> {
        let table = match self.table_for(name).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(collection = name, error = %e, "query on missing/unopenable collection");
                return Ok(Vec::new());
            }
        };

        let mut query = match table.query().nearest_to(vector) {
            Ok(q) => q,
            Err(e) => return Err(Self::store_err(name, e)),
        };
        query = query.distance_type(lancedb::DistanceType::L2).limit(k);
        if let Some(f) = filter {
            if let Some(predicate) = to_predicate(f) {
                query = query.only_if(predicate);
            }
        }

        let stream = query.execute().await.map_err(|e| Self::store_err(name, e))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(stream)
            .await
            .map_err(|e| Self::store_err(name, e))?;
        Ok(extract_hits(&batches))
    }

    async fn get(&self, name: &str, filter: &Filter) -> CoreResult<Vec<SearchHit>> {
        let table = match self.table_for(name).await {
            Ok(t) => t,
            Err(_) => return Ok(Vec::new()),
        };
        let mut query = table.query();
        if let Some(predicate) = to_predicate(filter) {
            query = query.only_if(predicate);
        }
        let stream = query.execute().await.map_err(|e| Self::store_err(name, e))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(stream)
            .await
            .map_err(|e| Self::store_err(name, e))?;
        Ok(extract_hits(&batches))
    }

    async fn delete(&self, name: &str, ids: &[String]) -> CoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = match self.table_for(name).await {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };
        let before = table.count_rows(None).await.unwrap_or(0);
        let id_list: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
        let predicate = format!("id IN ({})", id_list.join(", "));
        table.delete(&predicate).await.map_err(|e| Self::store_err(name, e))?;
        let after = table.count_rows(None).await.unwrap_or(0);
        Ok(before.saturating_sub(after))
    }

    async fn count(&self, name: &str) -> CoreResult<usize> {
        let table = match self.table_for(name).await {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };
        table.count_rows(None).await.map_err(|e| Self::store_err(name, e))
    }

    async fn cleanup_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let table = match self.table_for(name).await {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };
        let before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!("created_at > 0 AND created_at < {}", cutoff.timestamp());
        table.delete(&predicate).await.map_err(|e| Self::store_err(name, e))?;
        let after = table.count_rows(None).await.unwrap_or(0);
        Ok(before.saturating_sub(after))
    }
}

fn to_predicate(filter: &Filter) -> Option<String> {
    if filter.is_empty() {
        return None;
    }
    let clauses: Vec<String> = filter
        .equals
        .iter()
        .map(|(k, v)| {
            format!(
                "json_extract_string(metadata_json, '$.{}') = '{}'",
                k.replace('\'', "''"),
                v.replace('\'', "''")
            )
        })
        .collect();
    Some(clauses.join(" AND "))
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let documents = batch.column_by_name("document").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let metadata_jsons = batch.column_by_name("metadata_json").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(documents)) = (ids, documents) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let metadata: ChunkMetadata = metadata_jsons
                .map(|m| serde_json::from_str(m.value(i)).unwrap_or_default())
                .unwrap_or_default();
            hits.push(SearchHit {
                id: ids.value(i).to_string(),
                document: documents.value(i).to_string(),
                metadata,
                distance: distances.map(|d| d.value(i)).unwrap_or(0.0),
            });
        }
    }
    hits
}
