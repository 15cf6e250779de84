//! Idempotent schema creation for the two SQLite-backed collections
//! (`visual_records`, `text_records`), grounded on the teacher's
//! `migrate.rs` (one `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT
//! EXISTS` statement per table, run unconditionally at startup).
//!
//! Column layout follows the flat-metadata keys SPEC_FULL.md §6.4 requires
//! per collection: well-known fields get a real column; values the Codec
//! already renders as flat strings (`structure`, `bbox`, `page_nums`, …)
//! are stored as `TEXT`.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visual_records (
            id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            page INTEGER NOT NULL,
            image_path TEXT NOT NULL,
            thumb_path TEXT NOT NULL,
            format TEXT NOT NULL,
            mimetype TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            has_structure INTEGER NOT NULL DEFAULT 0,
            num_headings INTEGER NOT NULL DEFAULT 0,
            num_tables INTEGER NOT NULL DEFAULT 0,
            num_pictures INTEGER NOT NULL DEFAULT 0,
            max_heading_depth INTEGER NOT NULL DEFAULT 0,
            structure TEXT,
            image_width INTEGER NOT NULL,
            image_height INTEGER NOT NULL,
            lead_vector BLOB NOT NULL,
            embedding_full TEXT NOT NULL,
            metadata_version TEXT NOT NULL DEFAULT 'v1.0'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_visual_doc_id ON visual_records(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_visual_doc_page ON visual_records(doc_id, page)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS text_records (
            id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            filename TEXT NOT NULL,
            text_preview TEXT NOT NULL,
            full_text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            has_context INTEGER NOT NULL DEFAULT 0,
            parent_heading TEXT,
            parent_heading_level INTEGER,
            section_path TEXT,
            element_type TEXT,
            is_page_boundary INTEGER NOT NULL DEFAULT 0,
            related_tables TEXT NOT NULL DEFAULT '[]',
            related_pictures TEXT NOT NULL DEFAULT '[]',
            page_nums TEXT NOT NULL DEFAULT '[]',
            bbox TEXT,
            lead_vector BLOB NOT NULL,
            embedding_full TEXT NOT NULL,
            metadata_version TEXT NOT NULL DEFAULT 'v1.0'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_text_doc_id ON text_records(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_text_chunk_id ON text_records(chunk_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"visual_records"));
        assert!(names.contains(&"text_records"));
    }
}
