// SQLite ProjectStore Implementation
// Projects are stored as one JSON document per row, mirroring the
// document-store the external API layer owns.

use crate::job_store::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use terraflow_core::domain::Project;
use terraflow_core::error::Result;
use terraflow_core::port::{ProjectStore, TimeProvider};

pub struct SqliteProjectStore {
    pool: SqlitePool,
    time: Arc<dyn TimeProvider>,
}

impl SqliteProjectStore {
    pub fn new(pool: SqlitePool, time: Arc<dyn TimeProvider>) -> Self {
        Self { pool, time }
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let doc: Option<String> = sqlx::query_scalar("SELECT doc FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match doc {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, project: &Project) -> Result<()> {
        let doc = serde_json::to_string(project)?;
        let now = self.time.now_millis();

        sqlx::query(
            r#"
            INSERT INTO projects (id, doc, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                doc = excluded.doc,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&project.id)
        .bind(&doc)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use terraflow_core::domain::{Crs, OrthoOverlay, OverlayBounds};
    use terraflow_core::port::time_provider::SystemTimeProvider;

    async fn setup() -> SqliteProjectStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteProjectStore::new(pool, Arc::new(SystemTimeProvider))
    }

    #[tokio::test]
    async fn test_missing_project_reads_none() {
        let store = setup().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_round_trips_the_document() {
        let store = setup().await;

        let mut project = Project::new("PROJ-1");
        project.crs = Some(Crs {
            epsg: Some("26916".into()),
            name: Some("NAD83 / UTM 16N".into()),
            proj4: Some("+proj=utm +zone=16 +datum=NAD83".into()),
        });
        store.upsert(&project).await.unwrap();

        // Second write replaces the document
        project.ortho = Some(OrthoOverlay {
            url: Some("https://blobs.example/PROJ-1/ortho/overlay.webp".into()),
            thumbnail: None,
            bounds: Some(OverlayBounds::new(41.5, -87.9, 41.6, -87.8)),
        });
        store.upsert(&project).await.unwrap();

        let back = store.get("PROJ-1").await.unwrap().unwrap();
        assert_eq!(back.proj4(), Some("+proj=utm +zone=16 +datum=NAD83"));
        let bounds = back.ortho.unwrap().bounds.unwrap();
        assert_eq!(bounds.south(), 41.5);
    }
}
