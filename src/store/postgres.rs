use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use crate::model::{
    CreatedInstance, Entity, EntityKey, HistoricalInstance, Id, InstanceWithPosition,
    LatestInstance, NewEntity, NewInstance, NewPosition,
};
use crate::store::traits::{EntityStore, InstanceStore, PositionStore};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run the embedded migrations in `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn entity_from_row(row: &PgRow) -> Result<Entity> {
    Ok(Entity {
        entity_id: row.try_get("entity_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        integration_source: row.try_get("integration_source")?,
        template: row.try_get("template")?,
    })
}

#[async_trait::async_trait]
impl EntityStore for PostgresStore {
    async fn find_entity(&self, key: EntityKey<'_>) -> Result<Option<Entity>> {
        let row = sqlx::query(
            r#"
            SELECT entity_id, name, description, integration_source, template
            FROM entity
            WHERE name = $1 AND integration_source = $2
            LIMIT 1
            "#,
        )
        .bind(key.name)
        .bind(key.integration_source)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch entity")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(entity_from_row(&row)?))
    }

    async fn create_entity(&self, entity: NewEntity) -> Result<Entity> {
        let row = sqlx::query(
            r#"
            INSERT INTO entity (name, description, integration_source, template)
            VALUES ($1, $2, $3, $4)
            RETURNING entity_id, name, description, integration_source, template
            "#,
        )
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(&entity.integration_source)
        .bind(entity.template)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create entity")?;

        entity_from_row(&row)
    }

    async fn get_entity(&self, entity_id: Id) -> Result<Option<Entity>> {
        let row = sqlx::query(
            r#"
            SELECT entity_id, name, description, integration_source, template
            FROM entity
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch entity {}", entity_id))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(entity_from_row(&row)?))
    }

    async fn list_entities(&self, limit: u32, offset: u32) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, name, description, integration_source, template
            FROM entity
            ORDER BY entity_id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entities")?;

        rows.iter().map(entity_from_row).collect()
    }

    async fn entities_by_names(&self, names: &[String]) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, name, description, integration_source, template
            FROM entity
            WHERE name = ANY($1::text[])
            ORDER BY name, integration_source
            "#,
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch entities by name")?;

        rows.iter().map(entity_from_row).collect()
    }
}

#[async_trait::async_trait]
impl InstanceStore for PostgresStore {
    async fn create_instance(&self, instance: NewInstance) -> Result<CreatedInstance> {
        let row = sqlx::query(
            r#"
            INSERT INTO instance (entity_id, produced_by, created_at, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(instance.entity_id)
        .bind(instance.produced_by)
        .bind(instance.created_at)
        .bind(instance.metadata)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert instance")?;

        Ok(CreatedInstance {
            instance_id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn list_instances(&self) -> Result<Vec<InstanceWithPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT
                e.entity_id, e.name, e.integration_source, e.template,
                i.id AS instance_id, i.produced_by, i.created_at, i.modified_at, i.metadata,
                p.latitude_degrees, p.longitude_degrees, p.heading_degrees,
                p.altitude_hae_meters, p.speed_mps
            FROM entity e
            JOIN instance i ON e.entity_id = i.entity_id
            JOIN position p ON i.id = p.instance_id AND i.created_at = p.instance_created_at
            ORDER BY i.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list instances")?;

        rows.iter()
            .map(|row| -> Result<InstanceWithPosition> {
                Ok(InstanceWithPosition {
                    entity_id: row.try_get("entity_id")?,
                    name: row.try_get("name")?,
                    integration_source: row.try_get("integration_source")?,
                    template: row.try_get("template")?,
                    created_at: row.try_get("created_at")?,
                    modified_at: row.try_get("modified_at")?,
                    instance_id: row.try_get("instance_id")?,
                    produced_by: row.try_get("produced_by")?,
                    latitude_degrees: row.try_get("latitude_degrees")?,
                    longitude_degrees: row.try_get("longitude_degrees")?,
                    heading_degrees: row.try_get("heading_degrees")?,
                    altitude_hae_meters: row.try_get("altitude_hae_meters")?,
                    speed_mps: row.try_get("speed_mps")?,
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }

    async fn latest_instances(&self) -> Result<Vec<LatestInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (i.entity_id)
                i.id AS instance_id, i.entity_id, e.name, e.integration_source,
                i.produced_by, i.created_at, i.modified_at, i.metadata
            FROM instance i
            JOIN entity e ON e.entity_id = i.entity_id
            ORDER BY i.entity_id, i.created_at DESC, i.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch latest instances")?;

        rows.iter()
            .map(|row| -> Result<LatestInstance> {
                Ok(LatestInstance {
                    instance_id: row.try_get("instance_id")?,
                    entity_id: row.try_get("entity_id")?,
                    name: row.try_get("name")?,
                    integration_source: row.try_get("integration_source")?,
                    produced_by: row.try_get("produced_by")?,
                    created_at: row.try_get("created_at")?,
                    modified_at: row.try_get("modified_at")?,
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }

    async fn historical_instances(&self, window_seconds: i64) -> Result<Vec<HistoricalInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT
                i.id AS instance_id, i.entity_id, e.name AS entity_name, e.integration_source,
                i.produced_by, i.created_at, i.modified_at, i.metadata
            FROM instance i
            JOIN entity e ON e.entity_id = i.entity_id
            WHERE i.created_at >= NOW() - ($1::double precision * INTERVAL '1 second')
            ORDER BY i.created_at DESC
            "#,
        )
        .bind(window_seconds)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch historical instances")?;

        rows.iter()
            .map(|row| -> Result<HistoricalInstance> {
                Ok(HistoricalInstance {
                    instance_id: row.try_get("instance_id")?,
                    entity_id: row.try_get("entity_id")?,
                    entity_name: row.try_get("entity_name")?,
                    integration_source: row.try_get("integration_source")?,
                    produced_by: row.try_get("produced_by")?,
                    created_at: row.try_get("created_at")?,
                    modified_at: row.try_get("modified_at")?,
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PositionStore for PostgresStore {
    async fn create_position(&self, position: NewPosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position (
                instance_id, instance_created_at, latitude_degrees, longitude_degrees,
                heading_degrees, altitude_hae_meters, speed_mps
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(position.instance_id)
        .bind(position.instance_created_at)
        .bind(position.latitude_degrees)
        .bind(position.longitude_degrees)
        .bind(position.heading_degrees)
        .bind(position.altitude_hae_meters)
        .bind(position.speed_mps)
        .execute(&self.pool)
        .await
        .context("Failed to insert position")?;

        Ok(())
    }
}
