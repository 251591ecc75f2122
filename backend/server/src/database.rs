//! # Redis
//!
//! Durable home of every user record.
//!
//! ## Layout
//!
//! - `{prefix}:users`: set of every known Telegram id, walked by the sync job
//! - `{prefix}:user:{id}`: hash with `telegramId`, `name`, `totalClicks`, `currentClicks`,
//!   `lastSavedClicks`, `lastUpdated` (RFC 3339)
//! - `{prefix}:chunks:{id}`: list of sync deltas, trimmed to the last 100
//!
//! ## Writes
//!
//! Every patch is one `MULTI/EXEC`. Defaults are laid down with `HSETNX`, counters move with
//! `HINCRBY`, chunks with `RPUSH` + `LTRIM`. The resulting record is read back inside the same
//! transaction, so two submissions for the same user can never overwrite each other's increments.
//!
//! ## Connection
//!
//! The connection manager is created lazily. If Redis is down at startup the server still comes up
//! and every store call fails until Redis is reachable again.
use std::{collections::HashMap, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::{
    AsyncCommands, Client, Pipeline,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    error::StoreError,
    user::{MAX_CLICK_CHUNKS, UserPatch, UserRecord, UserRepository},
};

pub const FIELD_TELEGRAM_ID: &str = "telegramId";
pub const FIELD_NAME: &str = "name";
pub const FIELD_TOTAL_CLICKS: &str = "totalClicks";
pub const FIELD_CURRENT_CLICKS: &str = "currentClicks";
pub const FIELD_LAST_SAVED_CLICKS: &str = "lastSavedClicks";
pub const FIELD_LAST_UPDATED: &str = "lastUpdated";

type RawUser = (HashMap<String, String>, Vec<i64>);

pub struct RedisUserStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
}

impl RedisUserStore {
    /// Validates the URL only. No connection is attempted until [`RedisUserStore::connect`].
    pub fn open(redis_url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(redis_url)?,
            connection: OnceCell::new(),
            key_prefix: key_prefix.to_string(),
        })
    }

    pub async fn connect(&self) -> Result<ConnectionManager, StoreError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(Duration::from_millis(500));

                self.client
                    .get_connection_manager_with_config(config)
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))
            })
            .await?;

        Ok(connection.clone())
    }

    pub fn users_key(&self) -> String {
        format!("{}:users", self.key_prefix)
    }

    pub fn user_key(&self, telegram_id: &str) -> String {
        format!("{}:user:{}", self.key_prefix, telegram_id)
    }

    pub fn chunks_key(&self, telegram_id: &str) -> String {
        format!("{}:chunks:{}", self.key_prefix, telegram_id)
    }

    fn read_back(&self, pipe: &mut Pipeline, telegram_id: &str) {
        pipe.hgetall(self.user_key(telegram_id))
            .lrange(self.chunks_key(telegram_id), 0, -1);
    }

    fn patch_pipeline(&self, telegram_id: &str, patch: &UserPatch, now: DateTime<Utc>) -> Pipeline {
        let key = self.user_key(telegram_id);
        let chunks_key = self.chunks_key(telegram_id);

        let mut pipe = redis::pipe();
        pipe.atomic();

        pipe.sadd(self.users_key(), telegram_id)
            .ignore()
            .hset_nx(&key, FIELD_TELEGRAM_ID, telegram_id)
            .ignore()
            .hset_nx(&key, FIELD_NAME, "")
            .ignore()
            .hset_nx(&key, FIELD_TOTAL_CLICKS, 0)
            .ignore()
            .hset_nx(&key, FIELD_CURRENT_CLICKS, 0)
            .ignore()
            .hset_nx(&key, FIELD_LAST_SAVED_CLICKS, 0)
            .ignore()
            .hset_nx(&key, FIELD_LAST_UPDATED, format_timestamp(now))
            .ignore();

        if let Some(name) = &patch.name {
            pipe.hset(&key, FIELD_NAME, name).ignore();
        }

        if patch.add_current_clicks != 0 {
            pipe.hincr(&key, FIELD_CURRENT_CLICKS, patch.add_current_clicks)
                .ignore();
        }

        if patch.add_total_clicks != 0 {
            pipe.hincr(&key, FIELD_TOTAL_CLICKS, patch.add_total_clicks)
                .ignore();
        }

        if let Some(watermark) = patch.last_saved_clicks {
            pipe.hset(&key, FIELD_LAST_SAVED_CLICKS, watermark).ignore();
        }

        if let Some(chunk) = patch.push_chunk {
            pipe.rpush(&chunks_key, chunk)
                .ignore()
                .ltrim(&chunks_key, -(MAX_CLICK_CHUNKS as isize), -1)
                .ignore();
        }

        if let Some(at) = patch.last_updated {
            pipe.hset(&key, FIELD_LAST_UPDATED, format_timestamp(at))
                .ignore();
        }

        self.read_back(&mut pipe, telegram_id);

        pipe
    }
}

#[async_trait]
impl UserRepository for RedisUserStore {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut connection = self.connect().await?;

        let mut pipe = redis::pipe();
        self.read_back(&mut pipe, telegram_id);

        let (fields, chunks): RawUser = pipe.query_async(&mut connection).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        record_from_hash(telegram_id, &fields, chunks).map(Some)
    }

    async fn create_or_update(
        &self,
        telegram_id: &str,
        patch: UserPatch,
    ) -> Result<UserRecord, StoreError> {
        let mut connection = self.connect().await?;

        let pipe = self.patch_pipeline(telegram_id, &patch, Utc::now());
        let (fields, chunks): RawUser = pipe.query_async(&mut connection).await?;

        debug!(telegram_id, ?patch, "Patched user in Redis");

        record_from_hash(telegram_id, &fields, chunks)
    }

    async fn find_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut connection = self.connect().await?;

        let mut telegram_ids: Vec<String> = connection.smembers(self.users_key()).await?;
        telegram_ids.sort();

        let mut users = Vec::with_capacity(telegram_ids.len());
        for telegram_id in telegram_ids {
            if let Some(user) = self.find_by_telegram_id(&telegram_id).await? {
                users.push(user);
            }
        }

        Ok(users)
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn corrupt(telegram_id: &str, field: &'static str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        telegram_id: telegram_id.to_string(),
        field,
        reason: reason.to_string(),
    }
}

fn field<'a>(
    telegram_id: &str,
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, StoreError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| corrupt(telegram_id, name, "missing"))
}

fn counter(
    telegram_id: &str,
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<i64, StoreError> {
    i64::from_str(field(telegram_id, fields, name)?).map_err(|e| corrupt(telegram_id, name, e))
}

pub fn record_from_hash(
    telegram_id: &str,
    fields: &HashMap<String, String>,
    click_chunks: Vec<i64>,
) -> Result<UserRecord, StoreError> {
    let last_updated = DateTime::parse_from_rfc3339(field(telegram_id, fields, FIELD_LAST_UPDATED)?)
        .map_err(|e| corrupt(telegram_id, FIELD_LAST_UPDATED, e))?
        .with_timezone(&Utc);

    Ok(UserRecord {
        telegram_id: telegram_id.to_string(),
        name: field(telegram_id, fields, FIELD_NAME)?.to_string(),
        total_clicks: counter(telegram_id, fields, FIELD_TOTAL_CLICKS)?,
        current_clicks: counter(telegram_id, fields, FIELD_CURRENT_CLICKS)?,
        last_saved_clicks: counter(telegram_id, fields, FIELD_LAST_SAVED_CLICKS)?,
        click_chunks,
        last_updated,
    })
}
