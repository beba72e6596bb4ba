//! SQLite-backed status store.

use crate::{migrations, Result, StatusStore, StoreError};
use async_trait::async_trait;
use dockyard_common::{Build, BuildStatus, Image, NewImage};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, instrument};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Status store persisted in SQLite.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and bring the schema up to date.
    ///
    /// Any failure here is meant to abort startup.
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Initializing status store");

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives as long as its connection, so keep exactly one open.
        let pool = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(DEFAULT_MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        migrations::run(&pool).await?;

        info!("Status store initialized successfully");
        Ok(Self { pool })
    }

    /// Connect to a private in-memory database (for tests).
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Release every pooled connection. Pending queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Status store closed");
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn row_to_image(row: &SqliteRow) -> Result<Image> {
    Ok(Image {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base: row.try_get("base")?,
        code: row.try_get("code")?,
    })
}

fn row_to_build(row: &SqliteRow) -> Result<Build> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<BuildStatus>()
        .map_err(|e| StoreError::Corrupt(format!("build {id}: {e}")))?;

    Ok(Build {
        id,
        image_id: row.try_get("image_id")?,
        container_id: row.try_get("container_id")?,
        is_success: row.try_get("is_success")?,
        status,
    })
}

#[async_trait]
impl StatusStore for SqliteStore {
    #[instrument(skip(self, image), fields(name = %image.name))]
    async fn create_image(&self, image: NewImage) -> Result<Image> {
        let row = sqlx::query(
            r#"
            INSERT INTO images (name, base, code)
            VALUES (?, ?, ?)
            RETURNING id, name, base, code
            "#,
        )
        .bind(&image.name)
        .bind(&image.base)
        .bind(&image.code)
        .fetch_one(&self.pool)
        .await?;

        row_to_image(&row)
    }

    #[instrument(skip(self))]
    async fn list_images(&self) -> Result<Vec<Image>> {
        let rows = sqlx::query("SELECT id, name, base, code FROM images ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_image).collect()
    }

    #[instrument(skip(self), fields(image_id = %id))]
    async fn get_image(&self, id: i64) -> Result<Option<Image>> {
        let row = sqlx::query("SELECT id, name, base, code FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_image).transpose()
    }

    #[instrument(skip(self))]
    async fn list_builds(&self) -> Result<Vec<Build>> {
        let rows = sqlx::query(
            "SELECT id, image_id, container_id, is_success, status FROM builds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_build).collect()
    }

    #[instrument(skip(self))]
    async fn create_build(&self, image_id: i64) -> Result<Build> {
        let row = sqlx::query(
            r#"
            INSERT INTO builds (image_id)
            VALUES (?)
            RETURNING id, image_id, container_id, is_success, status
            "#,
        )
        .bind(image_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound {
                entity: "image",
                id: image_id,
            },
            _ => StoreError::Database(e),
        })?;

        row_to_build(&row)
    }

    #[instrument(skip(self), fields(build_id = %id))]
    async fn get_build(&self, id: i64) -> Result<Option<Build>> {
        let row = sqlx::query(
            "SELECT id, image_id, container_id, is_success, status FROM builds WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_build).transpose()
    }

    #[instrument(skip(self), fields(build_id = %id))]
    async fn update_build_result(
        &self,
        id: i64,
        is_success: bool,
        status: Option<BuildStatus>,
        container_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE builds
            SET is_success = ?,
                status = COALESCE(?, status),
                container_id = COALESCE(?, container_id)
            WHERE id = ?
            "#,
        )
        .bind(is_success)
        .bind(status.map(|s| s.as_str()))
        .bind(container_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "build", id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(build_id = %id))]
    async fn update_build_status(&self, id: i64, status: BuildStatus) -> Result<()> {
        let result = sqlx::query("UPDATE builds SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "build", id });
        }
        Ok(())
    }
}
