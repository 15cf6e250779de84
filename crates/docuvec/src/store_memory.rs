//! In-memory [`VectorStoreClient`] implementation, grounded on the
//! teacher's `InMemoryStore` (`RwLock<HashMap>`, brute-force cosine
//! similarity). Useful for tests and single-process deployments; has no
//! durability.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use docuvec_core::embedding::cosine_similarity;
use docuvec_core::store::{Collection, Metadata, StoreError, StoreRecord, VectorStoreClient, WhereFilter};

struct StoredRecord {
    lead_vector: Vec<f32>,
    metadata: Metadata,
}

#[derive(Default)]
struct CollectionTable {
    records: HashMap<String, StoredRecord>,
}

pub struct InMemoryVectorStore {
    visual: RwLock<CollectionTable>,
    text: RwLock<CollectionTable>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            visual: RwLock::new(CollectionTable::default()),
            text: RwLock::new(CollectionTable::default()),
        }
    }

    fn table(&self, collection: Collection) -> &RwLock<CollectionTable> {
        match collection {
            Collection::Visual => &self.visual,
            Collection::Text => &self.text,
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        lead_vector: &[f32],
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        let mut table = self.table(collection).write().unwrap();
        table.records.insert(
            id.to_string(),
            StoredRecord {
                lead_vector: lead_vector.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        lead_vector: &[f32],
        k: usize,
        where_filter: Option<&WhereFilter>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let table = self.table(collection).read().unwrap();
        let mut scored: Vec<StoreRecord> = table
            .records
            .iter()
            .filter(|(_, rec)| where_filter.map(|f| f.matches(&rec.metadata)).unwrap_or(true))
            .map(|(id, rec)| StoreRecord {
                id: id.clone(),
                similarity: cosine_similarity(lead_vector, &rec.lead_vector),
                metadata: rec.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let table = self.table(collection).read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                table.records.get(id).map(|rec| StoreRecord {
                    id: id.clone(),
                    similarity: 0.0,
                    metadata: rec.metadata.clone(),
                })
            })
            .collect())
    }

    async fn delete_by(
        &self,
        collection: Collection,
        where_filter: &WhereFilter,
    ) -> Result<u64, StoreError> {
        let mut table = self.table(collection).write().unwrap();
        let before = table.records.len();
        table.records.retain(|_, rec| !where_filter.matches(&rec.metadata));
        Ok((before - table.records.len()) as u64)
    }

    async fn heartbeat(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docuvec_core::store::MetaValue;

    fn meta(doc_id: &str) -> Metadata {
        [("doc_id".to_string(), MetaValue::Text(doc_id.to_string()))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn upsert_then_query_returns_closest_by_cosine() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(Collection::Visual, "a", &[1.0, 0.0], meta("doc-a"))
            .await
            .unwrap();
        store
            .upsert(Collection::Visual, "b", &[0.0, 1.0], meta("doc-b"))
            .await
            .unwrap();

        let results = store
            .query(Collection::Visual, &[1.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn query_respects_where_filter() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(Collection::Text, "a", &[1.0, 0.0], meta("doc-a"))
            .await
            .unwrap();
        store
            .upsert(Collection::Text, "b", &[1.0, 0.0], meta("doc-b"))
            .await
            .unwrap();

        let filter = WhereFilter::doc_id("doc-b");
        let results = store
            .query(Collection::Text, &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn delete_by_removes_matching_records_only() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(Collection::Visual, "a", &[1.0, 0.0], meta("doc-a"))
            .await
            .unwrap();
        store
            .upsert(Collection::Visual, "b", &[1.0, 0.0], meta("doc-b"))
            .await
            .unwrap();

        let removed = store
            .delete_by(Collection::Visual, &WhereFilter::doc_id("doc-a"))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = store.get_many(Collection::Visual, &["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }

    #[tokio::test]
    async fn heartbeat_is_always_true_for_in_process_store() {
        let store = InMemoryVectorStore::new();
        assert!(store.heartbeat().await);
    }
}
