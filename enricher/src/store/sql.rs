use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use sea_orm::{
    entity::*, query::*, sea_query::OnConflict, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, Schema,
};

use super::{
    entity::{self, Column, Entity as ChannelEnrichment},
    EnrichmentRecord, EnrichmentStore, RecordStatus, LOOKUP_CHUNK_SIZE, SCAN_PAGE_SIZE,
};
use crate::{channel::ChannelId, prompt::Classification};

/// SeaORM-backed store (Postgres in production, SQLite in tests).
#[derive(Clone)]
pub struct SeaOrmStore {
    conn: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        let mut db_options = ConnectOptions::new(db_url.to_string());
        db_options.sqlx_logging(false);
        let conn = Database::connect(db_options)
            .await
            .context("Database connection failed")?;
        let store = Self::new(conn);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the table if this database has never seen it.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let backend = self.conn.get_database_backend();
        let mut stmt = Schema::new(backend).create_table_from_entity(ChannelEnrichment);
        stmt.if_not_exists();
        self.conn
            .execute(backend.build(&stmt))
            .await
            .context("Could not create channel_enrichment table")?;
        Ok(())
    }

    async fn scan_page(
        &self,
        after: Option<String>,
    ) -> anyhow::Result<Option<(Vec<EnrichmentRecord>, Option<String>)>> {
        let mut query = ChannelEnrichment::find().order_by_asc(Column::ChannelKey);
        if let Some(after) = after.as_ref() {
            query = query.filter(Column::ChannelKey.gt(after.clone()));
        }
        let models = query.limit(SCAN_PAGE_SIZE).all(&self.conn).await?;
        if models.is_empty() {
            return Ok(None);
        }

        let next = if (models.len() as u64) < SCAN_PAGE_SIZE {
            None
        } else {
            models.last().map(|m| m.channel_key.clone())
        };
        let mut records = Vec::with_capacity(models.len());
        for model in models {
            // A bad row must not hide the rest of the table from the report
            let Some(channel) = ChannelId::parse(&model.channel_key) else {
                tracing::warn!("Skipping stored key that is not a channel: {}", model.channel_key);
                continue;
            };
            if channel.as_str() != model.channel_key {
                tracing::warn!(
                    "Stored key {} is not canonical, reads as {}",
                    model.channel_key,
                    channel
                );
            }
            records.push(record_from_model(model, channel)?);
        }
        Ok(Some((records, next)))
    }
}

fn record_from_model(
    model: entity::Model,
    channel: ChannelId,
) -> anyhow::Result<EnrichmentRecord> {
    let status = model
        .status
        .parse::<RecordStatus>()
        .with_context(|| format!("Unknown status {} for {}", model.status, model.channel_key))?;
    let classification = match model.classification {
        serde_json::Value::Object(map) => Classification::from_attributes(map),
        _ => Classification::from_attributes(serde_json::Map::new()),
    };

    Ok(EnrichmentRecord {
        channel,
        channel_name: model.channel_name,
        status,
        classification,
        schema_version: model.schema_version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn active_model(record: &EnrichmentRecord) -> entity::ActiveModel {
    entity::ActiveModel {
        channel_key: ActiveValue::Set(record.channel.to_string()),
        channel_name: ActiveValue::Set(record.channel_name.clone()),
        status: ActiveValue::Set(record.status.to_string()),
        classification: ActiveValue::Set(serde_json::Value::Object(
            record.classification.attributes().clone(),
        )),
        schema_version: ActiveValue::Set(record.schema_version),
        created_at: ActiveValue::Set(record.created_at),
        updated_at: ActiveValue::Set(record.updated_at),
    }
}

fn upsert_conflict() -> OnConflict {
    OnConflict::column(Column::ChannelKey)
        .update_columns([
            Column::ChannelName,
            Column::Status,
            Column::Classification,
            Column::SchemaVersion,
            Column::UpdatedAt,
        ])
        .to_owned()
}

#[async_trait]
impl EnrichmentStore for SeaOrmStore {
    async fn lookup(&self, channel: &ChannelId) -> anyhow::Result<Option<EnrichmentRecord>> {
        ChannelEnrichment::find_by_id(channel.to_string())
            .one(&self.conn)
            .await?
            .map(|model| record_from_model(model, channel.clone()))
            .transpose()
    }

    async fn batch_lookup(
        &self,
        channels: &[ChannelId],
    ) -> anyhow::Result<HashMap<ChannelId, EnrichmentRecord>> {
        let mut found = HashMap::with_capacity(channels.len());
        for chunk in channels.chunks(LOOKUP_CHUNK_SIZE) {
            let requested: HashMap<&str, &ChannelId> =
                chunk.iter().map(|c| (c.as_str(), c)).collect();
            let models = ChannelEnrichment::find()
                .filter(Column::ChannelKey.is_in(requested.keys().copied()))
                .all(&self.conn)
                .await?;
            for model in models {
                // Key results by the id that was asked for, not a re-parse of the row
                let Some(&channel) = requested.get(model.channel_key.as_str()) else {
                    continue;
                };
                found.insert(channel.clone(), record_from_model(model, channel.clone())?);
            }
        }
        Ok(found)
    }

    async fn upsert(&self, record: &EnrichmentRecord) -> anyhow::Result<()> {
        ChannelEnrichment::insert(active_model(record))
            .on_conflict(upsert_conflict())
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    async fn upsert_many(&self, records: &[EnrichmentRecord]) -> anyhow::Result<usize> {
        let mut total = 0;
        for chunk in records.chunks(LOOKUP_CHUNK_SIZE) {
            let models: Vec<_> = chunk.iter().map(active_model).collect();
            ChannelEnrichment::insert_many(models)
                .on_conflict(upsert_conflict())
                .exec_without_returning(&self.conn)
                .await?;
            total += chunk.len();
            tracing::debug!("Upserted chunk of {} records", chunk.len());
        }
        Ok(total)
    }

    fn scan_all(&self) -> BoxStream<'_, anyhow::Result<EnrichmentRecord>> {
        // (cursor, finished)
        futures::stream::try_unfold((None::<String>, false), move |(after, done)| async move {
            if done {
                return anyhow::Ok(None);
            }
            let page = self.scan_page(after).await?;
            anyhow::Ok(page.map(|(records, next)| {
                let finished = next.is_none();
                (
                    futures::stream::iter(records.into_iter().map(anyhow::Ok)),
                    (next, finished),
                )
            }))
        })
        .try_flatten()
        .boxed()
    }

    async fn stale_channels(&self, current_version: i32) -> anyhow::Result<Vec<ChannelId>> {
        let keys: Vec<String> = ChannelEnrichment::find()
            .select_only()
            .column(Column::ChannelKey)
            .filter(Column::SchemaVersion.lt(current_version))
            .order_by_asc(Column::ChannelKey)
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(keys.iter().filter_map(|k| ChannelId::parse(k)).collect())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = ChannelEnrichment::delete_many()
            .filter(Column::CreatedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
