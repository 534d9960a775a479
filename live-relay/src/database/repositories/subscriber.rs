//! Subscriber repository.
//!
//! The configuration tree is stored across three tables (`push_user`,
//! `push_target`, `push_message`) and assembled into domain subscribers here.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{PushMessageDbModel, PushTargetDbModel, PushUserDbModel};
use crate::domain::Subscriber;

/// Subscriber repository trait.
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    async fn list_users(&self) -> Result<Vec<PushUserDbModel>>;
    async fn list_targets(&self) -> Result<Vec<PushTargetDbModel>>;
    async fn list_messages(&self) -> Result<Vec<PushMessageDbModel>>;

    /// Insert a subscriber with all its destinations and bindings.
    ///
    /// Returns the row id of the new user.
    async fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<i64>;

    /// Delete a subscriber and everything below it. Returns whether a row was removed.
    async fn delete_subscriber(&self, platform: &str, uid: i64) -> Result<bool>;

    /// Load the whole configuration tree, in insertion order.
    async fn load_all(&self) -> Result<Vec<Subscriber>> {
        let users = self.list_users().await?;
        let targets = self.list_targets().await?;
        let messages = self.list_messages().await?;
        assemble(users, targets, messages)
    }
}

/// Build domain subscribers from table rows. Rows are expected in id order.
pub fn assemble(
    users: Vec<PushUserDbModel>,
    targets: Vec<PushTargetDbModel>,
    messages: Vec<PushMessageDbModel>,
) -> Result<Vec<Subscriber>> {
    let mut bindings_by_target: HashMap<i64, Vec<_>> = HashMap::new();
    for message in &messages {
        bindings_by_target
            .entry(message.target_id)
            .or_default()
            .push(message.to_binding()?);
    }

    let mut destinations_by_user: HashMap<i64, Vec<_>> = HashMap::new();
    for target in &targets {
        let mut destination = target.to_destination();
        destination.bindings = bindings_by_target.remove(&target.id).unwrap_or_default();
        destinations_by_user
            .entry(target.user_id)
            .or_default()
            .push(destination);
    }

    Ok(users
        .into_iter()
        .map(|user| Subscriber {
            uid: user.uid,
            platform: user.platform,
            uname: user.uname,
            room_id: user.room_id,
            face: None,
            enabled: user.enabled,
            destinations: destinations_by_user.remove(&user.id).unwrap_or_default(),
        })
        .collect())
}

/// SQLx implementation of SubscriberRepository.
pub struct SqlxSubscriberRepository {
    pool: SqlitePool,
}

impl SqlxSubscriberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRepository for SqlxSubscriberRepository {
    async fn list_users(&self) -> Result<Vec<PushUserDbModel>> {
        let users = sqlx::query_as::<_, PushUserDbModel>("SELECT * FROM push_user ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn list_targets(&self) -> Result<Vec<PushTargetDbModel>> {
        let targets =
            sqlx::query_as::<_, PushTargetDbModel>("SELECT * FROM push_target ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(targets)
    }

    async fn list_messages(&self) -> Result<Vec<PushMessageDbModel>> {
        let messages =
            sqlx::query_as::<_, PushMessageDbModel>("SELECT * FROM push_message ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(messages)
    }

    async fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let user_id = sqlx::query(
            r#"
            INSERT INTO push_user (uid, uname, room_id, platform, enabled)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscriber.uid)
        .bind(&subscriber.uname)
        .bind(subscriber.room_id)
        .bind(&subscriber.platform)
        .bind(subscriber.enabled)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for destination in &subscriber.destinations {
            let target_id = sqlx::query(
                r#"
                INSERT INTO push_target (user_id, platform, type, num, enabled)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(&destination.platform)
            .bind(destination.kind.code())
            .bind(destination.id)
            .bind(destination.enabled)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for binding in &destination.bindings {
                sqlx::query(
                    r#"
                    INSERT INTO push_message (target_id, event, handler, params, enabled)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(target_id)
                .bind(&binding.event)
                .bind(binding.handler_id())
                .bind(serde_json::to_string(&binding.params)?)
                .bind(binding.enabled)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(user_id)
    }

    async fn delete_subscriber(&self, platform: &str, uid: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM push_user WHERE platform = ? AND uid = ?")
            .bind(platform)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
