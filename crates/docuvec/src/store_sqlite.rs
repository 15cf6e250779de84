//! SQLite-backed [`VectorStoreClient`], grounded on the teacher's
//! `SqliteStore` (maps each trait method onto hand-written SQL against a
//! fixed schema; vector search is fetch-all-then-brute-force cosine
//! similarity in process, same as the teacher's `vector_search`).
//!
//! Lead vectors are stored as little-endian `f32` blobs. Metadata is
//! stored as real columns per [`crate::migrate`]'s schema and reassembled
//! into a flat [`Metadata`] map on read.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docuvec_core::embedding::cosine_similarity;
use docuvec_core::search::SEQUENCE_METADATA_KEY;
use docuvec_core::store::{
    Collection, MetaValue, Metadata, StoreError, StoreRecord, VectorStoreClient, WhereFilter,
};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn table_name(collection: Collection) -> &'static str {
    match collection {
        Collection::Visual => "visual_records",
        Collection::Text => "text_records",
    }
}

fn opt_str(v: Option<&MetaValue>) -> String {
    v.and_then(MetaValue::as_text).unwrap_or_default().to_string()
}

fn opt_int(v: Option<&MetaValue>) -> i64 {
    v.and_then(MetaValue::as_int).unwrap_or_default()
}

fn opt_int_nullable(v: Option<&MetaValue>) -> Option<i64> {
    v.and_then(MetaValue::as_int)
}

fn opt_str_nullable(v: Option<&MetaValue>) -> Option<String> {
    v.and_then(MetaValue::as_text).map(|s| s.to_string())
}

fn opt_bool_as_int(v: Option<&MetaValue>) -> i64 {
    matches!(v, Some(MetaValue::Bool(true))) as i64
}

#[async_trait]
impl VectorStoreClient for SqliteVectorStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        lead_vector: &[f32],
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        let blob = vec_to_blob(lead_vector);
        let m = metadata;
        let err = |e: sqlx::Error| StoreError::Transport(e.to_string());

        match collection {
            Collection::Visual => {
                sqlx::query(
                    r#"
                    INSERT INTO visual_records
                        (id, doc_id, filename, page, image_path, thumb_path, format, mimetype,
                         timestamp, has_structure, num_headings, num_tables, num_pictures,
                         max_heading_depth, structure, image_width, image_height, lead_vector,
                         embedding_full)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        doc_id = excluded.doc_id, filename = excluded.filename,
                        page = excluded.page, image_path = excluded.image_path,
                        thumb_path = excluded.thumb_path, format = excluded.format,
                        mimetype = excluded.mimetype, timestamp = excluded.timestamp,
                        has_structure = excluded.has_structure, num_headings = excluded.num_headings,
                        num_tables = excluded.num_tables, num_pictures = excluded.num_pictures,
                        max_heading_depth = excluded.max_heading_depth, structure = excluded.structure,
                        image_width = excluded.image_width, image_height = excluded.image_height,
                        lead_vector = excluded.lead_vector, embedding_full = excluded.embedding_full
                    "#,
                )
                .bind(id)
                .bind(opt_str(m.get("doc_id")))
                .bind(opt_str(m.get("filename")))
                .bind(opt_int(m.get("page")))
                .bind(opt_str(m.get("image_path")))
                .bind(opt_str(m.get("thumb_path")))
                .bind(opt_str(m.get("format")))
                .bind(opt_str(m.get("mimetype")))
                .bind(opt_int(m.get("timestamp")))
                .bind(opt_bool_as_int(m.get("has_structure")))
                .bind(opt_int(m.get("num_headings")))
                .bind(opt_int(m.get("num_tables")))
                .bind(opt_int(m.get("num_pictures")))
                .bind(opt_int(m.get("max_heading_depth")))
                .bind(opt_str_nullable(m.get("structure")))
                .bind(opt_int(m.get("image_width")))
                .bind(opt_int(m.get("image_height")))
                .bind(&blob)
                .bind(opt_str(m.get(SEQUENCE_METADATA_KEY)))
                .execute(&self.pool)
                .await
                .map_err(err)?;
            }
            Collection::Text => {
                sqlx::query(
                    r#"
                    INSERT INTO text_records
                        (id, doc_id, chunk_id, page, filename, text_preview, full_text,
                         word_count, timestamp, has_context, parent_heading, parent_heading_level,
                         section_path, element_type, is_page_boundary, related_tables,
                         related_pictures, page_nums, bbox, lead_vector, embedding_full)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        doc_id = excluded.doc_id, chunk_id = excluded.chunk_id, page = excluded.page,
                        filename = excluded.filename, text_preview = excluded.text_preview,
                        full_text = excluded.full_text, word_count = excluded.word_count,
                        timestamp = excluded.timestamp, has_context = excluded.has_context,
                        parent_heading = excluded.parent_heading,
                        parent_heading_level = excluded.parent_heading_level,
                        section_path = excluded.section_path, element_type = excluded.element_type,
                        is_page_boundary = excluded.is_page_boundary,
                        related_tables = excluded.related_tables,
                        related_pictures = excluded.related_pictures, page_nums = excluded.page_nums,
                        bbox = excluded.bbox, lead_vector = excluded.lead_vector,
                        embedding_full = excluded.embedding_full
                    "#,
                )
                .bind(id)
                .bind(opt_str(m.get("doc_id")))
                .bind(opt_str(m.get("chunk_id")))
                .bind(opt_int(m.get("page")))
                .bind(opt_str(m.get("filename")))
                .bind(opt_str(m.get("text_preview")))
                .bind(opt_str(m.get("full_text")))
                .bind(opt_int(m.get("word_count")))
                .bind(opt_int(m.get("timestamp")))
                .bind(opt_bool_as_int(m.get("has_context")))
                .bind(opt_str_nullable(m.get("parent_heading")))
                .bind(opt_int_nullable(m.get("parent_heading_level")))
                .bind(opt_str_nullable(m.get("section_path")))
                .bind(opt_str_nullable(m.get("element_type")))
                .bind(opt_bool_as_int(m.get("is_page_boundary")))
                .bind(opt_str(m.get("related_tables")))
                .bind(opt_str(m.get("related_pictures")))
                .bind(opt_str(m.get("page_nums")))
                .bind(opt_str_nullable(m.get("bbox")))
                .bind(&blob)
                .bind(opt_str(m.get(SEQUENCE_METADATA_KEY)))
                .execute(&self.pool)
                .await
                .map_err(err)?;
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        lead_vector: &[f32],
        k: usize,
        where_filter: Option<&WhereFilter>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let all = self.scan(collection).await?;
        let mut scored: Vec<StoreRecord> = all
            .into_iter()
            .filter(|r| where_filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
            .map(|r| StoreRecord {
                id: r.id,
                similarity: cosine_similarity(lead_vector, &r.lead_vector),
                metadata: r.metadata,
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
        let all = self.scan(collection).await?;
        Ok(all
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .map(|r| StoreRecord {
                id: r.id,
                similarity: 0.0,
                metadata: r.metadata,
            })
            .collect())
    }

    async fn delete_by(
        &self,
        collection: Collection,
        where_filter: &WhereFilter,
    ) -> Result<u64, StoreError> {
        let all = self.scan(collection).await?;
        let doomed: Vec<String> = all
            .into_iter()
            .filter(|r| where_filter.matches(&r.metadata))
            .map(|r| r.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let table = table_name(collection);
        let placeholders = doomed.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM {table} WHERE id IN ({placeholders})");
        let mut q = sqlx::query(&sql);
        for id in &doomed {
            q = q.bind(id);
        }
        q.execute(&self.pool)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(doomed.len() as u64)
    }

    async fn heartbeat(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

/// Row fetched during a full scan, before cosine similarity against a
/// particular query vector has been computed.
struct ScannedRecord {
    id: String,
    lead_vector: Vec<f32>,
    metadata: Metadata,
}

impl SqliteVectorStore {
    async fn scan(&self, collection: Collection) -> Result<Vec<ScannedRecord>, StoreError> {
        let table = table_name(collection);
        let rows = sqlx::query(&format!("SELECT * FROM {table}"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("lead_vector");
            let metadata = match collection {
                Collection::Visual => visual_metadata_from_row(row),
                Collection::Text => text_metadata_from_row(row),
            };
            out.push(ScannedRecord {
                id,
                lead_vector: blob_to_vec(&blob),
                metadata,
            });
        }
        Ok(out)
    }
}

fn visual_metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> Metadata {
    let mut m = Metadata::new();
    m.insert("doc_id".into(), MetaValue::Text(row.get("doc_id")));
    m.insert("filename".into(), MetaValue::Text(row.get("filename")));
    m.insert("page".into(), MetaValue::Int(row.get::<i64, _>("page")));
    m.insert("image_path".into(), MetaValue::Text(row.get("image_path")));
    m.insert("thumb_path".into(), MetaValue::Text(row.get("thumb_path")));
    m.insert("format".into(), MetaValue::Text(row.get("format")));
    m.insert("mimetype".into(), MetaValue::Text(row.get("mimetype")));
    m.insert("timestamp".into(), MetaValue::Int(row.get::<i64, _>("timestamp")));
    m.insert(
        "has_structure".into(),
        MetaValue::Bool(row.get::<i64, _>("has_structure") != 0),
    );
    m.insert("num_headings".into(), MetaValue::Int(row.get::<i64, _>("num_headings")));
    m.insert("num_tables".into(), MetaValue::Int(row.get::<i64, _>("num_tables")));
    m.insert("num_pictures".into(), MetaValue::Int(row.get::<i64, _>("num_pictures")));
    m.insert(
        "max_heading_depth".into(),
        MetaValue::Int(row.get::<i64, _>("max_heading_depth")),
    );
    if let Some(structure) = row.get::<Option<String>, _>("structure") {
        m.insert("structure".into(), MetaValue::Text(structure));
    }
    m.insert("image_width".into(), MetaValue::Int(row.get::<i64, _>("image_width")));
    m.insert("image_height".into(), MetaValue::Int(row.get::<i64, _>("image_height")));
    m.insert(SEQUENCE_METADATA_KEY.into(), MetaValue::Text(row.get("embedding_full")));
    m
}

fn text_metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> Metadata {
    let mut m = Metadata::new();
    m.insert("doc_id".into(), MetaValue::Text(row.get("doc_id")));
    m.insert("chunk_id".into(), MetaValue::Text(row.get("chunk_id")));
    m.insert("page".into(), MetaValue::Int(row.get::<i64, _>("page")));
    m.insert("filename".into(), MetaValue::Text(row.get("filename")));
    m.insert("text_preview".into(), MetaValue::Text(row.get("text_preview")));
    m.insert("full_text".into(), MetaValue::Text(row.get("full_text")));
    m.insert("word_count".into(), MetaValue::Int(row.get::<i64, _>("word_count")));
    m.insert("timestamp".into(), MetaValue::Int(row.get::<i64, _>("timestamp")));
    m.insert(
        "has_context".into(),
        MetaValue::Bool(row.get::<i64, _>("has_context") != 0),
    );
    if let Some(v) = row.get::<Option<String>, _>("parent_heading") {
        m.insert("parent_heading".into(), MetaValue::Text(v));
    }
    if let Some(v) = row.get::<Option<i64>, _>("parent_heading_level") {
        m.insert("parent_heading_level".into(), MetaValue::Int(v));
    }
    if let Some(v) = row.get::<Option<String>, _>("section_path") {
        m.insert("section_path".into(), MetaValue::Text(v));
    }
    if let Some(v) = row.get::<Option<String>, _>("element_type") {
        m.insert("element_type".into(), MetaValue::Text(v));
    }
    m.insert(
        "is_page_boundary".into(),
        MetaValue::Bool(row.get::<i64, _>("is_page_boundary") != 0),
    );
    m.insert("related_tables".into(), MetaValue::Text(row.get("related_tables")));
    m.insert("related_pictures".into(), MetaValue::Text(row.get("related_pictures")));
    m.insert("page_nums".into(), MetaValue::Text(row.get("page_nums")));
    if let Some(v) = row.get::<Option<String>, _>("bbox") {
        m.insert("bbox".into(), MetaValue::Text(v));
    }
    m.insert(SEQUENCE_METADATA_KEY.into(), MetaValue::Text(row.get("embedding_full")));
    m
}
