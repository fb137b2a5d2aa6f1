use std::collections::BTreeMap;

use anyhow::Context;
use sea_orm::{
    ActiveModelTrait, Database, DatabaseConnection, EntityTrait, QuerySelect, Set,
    TransactionTrait, sea_query::OnConflict,
};
use serde_json::Value;

use crate::entities::settings;
use crate::{Edit, SettingsStore};

/// Postgres-backed store; `modify` holds a `SELECT ... FOR UPDATE` row lock.
#[derive(Debug, Clone)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, sea_orm::DbErr> {
        Ok(Self::new(Database::connect(database_url).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn row(key: &str, value: Value) -> settings::ActiveModel {
        settings::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(chrono::Utc::now().into()),
        }
    }
}

#[async_trait::async_trait]
impl SettingsStore for DbStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let row = settings::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await
            .with_context(|| format!("read setting {key}"))?;
        Ok(row.map(|m| m.value))
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        settings::Entity::insert(Self::row(key, value))
            .on_conflict(
                OnConflict::column(settings::Column::Key)
                    .update_columns([settings::Column::Value, settings::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .with_context(|| format!("write setting {key}"))?;
        Ok(())
    }

    async fn all(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        let rows = settings::Entity::find()
            .all(&self.db)
            .await
            .context("list settings")?;
        Ok(rows.into_iter().map(|m| (m.key, m.value)).collect())
    }

    async fn modify(&self, key: &str, edit: Edit<'_>) -> anyhow::Result<Value> {
        // Seed the row first so the exclusive lock below always has something to hold.
        settings::Entity::insert(Self::row(key, Value::Null))
            .on_conflict(
                OnConflict::column(settings::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .with_context(|| format!("seed setting {key}"))?;

        let txn = self.db.begin().await.context("begin transaction")?;
        let row = settings::Entity::find_by_id(key.to_string())
            .lock_exclusive()
            .one(&txn)
            .await
            .with_context(|| format!("lock setting {key}"))?
            .ok_or_else(|| anyhow::anyhow!("setting {key} disappeared while locked"))?;

        let mut value = row.value.clone();
        // Dropping `txn` on error rolls back and releases the lock.
        edit(&mut value)?;

        let mut update: settings::ActiveModel = row.into();
        update.value = Set(value.clone());
        update.updated_at = Set(chrono::Utc::now().into());
        update.update(&txn).await.with_context(|| format!("update setting {key}"))?;
        txn.commit().await.context("commit transaction")?;

        Ok(value)
    }
}
