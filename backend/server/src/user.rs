//! # Users
//!
//! One record per Telegram user.
//!
//! ## Counters
//!
//! - **currentClicks**: running counter, only ever incremented by click submissions. Never reset.
//! - **lastSavedClicks**: watermark, the value of `currentClicks` as of the last sync run.
//! - **totalClicks**: durable total, only touched by the sync job.
//!
//! The sync job folds `currentClicks - lastSavedClicks` into `totalClicks` and moves the
//! watermark. Keeping `currentClicks` cumulative means a submission landing in the middle of a
//! sync run is never lost, it just shows up in the next delta.
//!
//! A delta that is negative, or too far from the watermark to fit in an `i64`, is skipped.
//! An increment that would overflow a counter is rejected by Redis and the write fails. The
//! rest of that write still lands, since `MULTI/EXEC` does not roll back.
//!
//! ## Chunks
//!
//! Every positive sync delta is appended to `clickChunks`. Only the most recent
//! [`MAX_CLICK_CHUNKS`] are kept, oldest dropped first.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const MAX_CLICK_CHUNKS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub telegram_id: String,
    pub name: String,
    pub total_clicks: i64,
    pub current_clicks: i64,
    pub last_saved_clicks: i64,
    pub click_chunks: Vec<i64>,
    pub last_updated: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(telegram_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            telegram_id: telegram_id.into(),
            name: String::new(),
            total_clicks: 0,
            current_clicks: 0,
            last_saved_clicks: 0,
            click_chunks: Vec::new(),
            last_updated: now,
        }
    }

    /// Clicks submitted since the last sync. Negative if the counter went backwards, `None` if
    /// the difference does not fit in an `i64`.
    pub fn unsaved_clicks(&self) -> Option<i64> {
        self.current_clicks.checked_sub(self.last_saved_clicks)
    }
}

/// Fields to merge into a user record.
///
/// Counters are expressed as increments so stores can apply them in place instead of
/// read-modify-write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub add_current_clicks: i64,
    pub add_total_clicks: i64,
    pub last_saved_clicks: Option<i64>,
    pub push_chunk: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserPatch {
    /// A click submission: rename, bump the running counter, touch the timestamp.
    pub fn clicks(name: impl Into<String>, clicks: i64, now: DateTime<Utc>) -> Self {
        Self {
            name: Some(name.into()),
            add_current_clicks: clicks,
            last_updated: Some(now),
            ..Self::default()
        }
    }

    /// A sync step: fold `delta` into the total, record it as a chunk, move the watermark.
    pub fn sync(delta: i64, watermark: i64) -> Self {
        Self {
            add_total_clicks: delta,
            last_saved_clicks: Some(watermark),
            push_chunk: Some(delta),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Creates the record with defaults if missing, then merges `patch` and returns the result.
    async fn create_or_update(
        &self,
        telegram_id: &str,
        patch: UserPatch,
    ) -> Result<UserRecord, StoreError>;

    async fn find_all(&self) -> Result<Vec<UserRecord>, StoreError>;
}
