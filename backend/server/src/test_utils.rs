//! In-memory [`UserRepository`] for tests.
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use redis::{ErrorKind, RedisError};
use tokio::sync::Mutex;

use crate::{
    config::Config,
    error::StoreError,
    state::AppState,
    user::{MAX_CLICK_CHUNKS, UserPatch, UserRecord, UserRepository},
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<BTreeMap<String, UserRecord>>,
    fail: AtomicBool,
    /// Number of writes to let through before failing, when failing is enabled.
    fail_after_writes: AtomicUsize,
}

impl MemoryUserStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_after_writes.store(0, Ordering::SeqCst);
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Lets `writes` more writes succeed, then fails everything.
    pub fn fail_after(&self, writes: usize) {
        self.fail_after_writes.store(writes, Ordering::SeqCst);
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users
            .lock()
            .await
            .insert(user.telegram_id.clone(), user);
    }

    pub async fn get(&self, telegram_id: &str) -> Option<UserRecord> {
        self.users.lock().await.get(telegram_id).cloned()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) && self.fail_after_writes.load(Ordering::SeqCst) == 0 {
            return Err(offline());
        }

        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if !self.fail.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.fail_after_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| offline())
    }
}

#[async_trait]
impl UserRepository for MemoryUserStore {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check_read()?;

        Ok(self.get(telegram_id).await)
    }

    async fn create_or_update(
        &self,
        telegram_id: &str,
        patch: UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.check_write()?;

        let mut users = self.users.lock().await;
        let mut user = users
            .get(telegram_id)
            .cloned()
            .unwrap_or_else(|| UserRecord::new(telegram_id, Utc::now()));

        apply(&mut user, &patch)?;
        users.insert(telegram_id.to_string(), user.clone());

        Ok(user)
    }

    async fn find_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.check_read()?;

        Ok(self.users.lock().await.values().cloned().collect())
    }
}

fn offline() -> StoreError {
    StoreError::Unavailable("memory store offline".to_string())
}

/// Same error Redis gives when `HINCRBY` would leave the `i64` range.
fn overflow() -> StoreError {
    RedisError::from((ErrorKind::ResponseError, "increment or decrement would overflow")).into()
}

/// Merges `patch` the way a `MULTI/EXEC` in `RedisUserStore` does. An increment that would
/// overflow leaves its counter alone, the rest of the patch still lands, and the write fails.
fn apply(user: &mut UserRecord, patch: &UserPatch) -> Result<(), StoreError> {
    let current_clicks = user.current_clicks.checked_add(patch.add_current_clicks);
    let total_clicks = user.total_clicks.checked_add(patch.add_total_clicks);

    if let Some(current_clicks) = current_clicks {
        user.current_clicks = current_clicks;
    }

    if let Some(total_clicks) = total_clicks {
        user.total_clicks = total_clicks;
    }

    if let Some(name) = &patch.name {
        user.name = name.clone();
    }

    if let Some(watermark) = patch.last_saved_clicks {
        user.last_saved_clicks = watermark;
    }

    if let Some(chunk) = patch.push_chunk {
        user.click_chunks.push(chunk);

        if user.click_chunks.len() > MAX_CLICK_CHUNKS {
            let excess = user.click_chunks.len() - MAX_CLICK_CHUNKS;
            user.click_chunks.drain(..excess);
        }
    }

    if let Some(at) = patch.last_updated {
        user.last_updated = at;
    }

    match (current_clicks, total_clicks) {
        (Some(_), Some(_)) => Ok(()),
        _ => Err(overflow()),
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        redis_url: "redis://localhost:6379".to_string(),
        key_prefix: "test".to_string(),
        sync_interval: std::time::Duration::from_millis(20),
    }
}

pub fn test_state(store: Arc<MemoryUserStore>) -> Arc<AppState> {
    AppState::with_repository(test_config(), store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserRecord {
        UserRecord::new("u1", Utc::now())
    }

    #[test]
    fn test_clicks_patch_renames_and_increments() {
        let mut user = record();
        let now = Utc::now();

        apply(&mut user, &UserPatch::clicks("Alice", 5, now)).unwrap();
        apply(&mut user, &UserPatch::clicks("Alicia", 3, now)).unwrap();

        assert_eq!(user.name, "Alicia");
        assert_eq!(user.current_clicks, 8);
        assert_eq!(user.total_clicks, 0);
        assert_eq!(user.last_updated, now);
    }

    #[test]
    fn test_sync_patch_moves_watermark() {
        let mut user = record();
        apply(&mut user, &UserPatch::clicks("Alice", 5, Utc::now())).unwrap();

        apply(&mut user, &UserPatch::sync(5, 5)).unwrap();

        assert_eq!(user.total_clicks, 5);
        assert_eq!(user.last_saved_clicks, 5);
        assert_eq!(user.click_chunks, vec![5]);
        assert_eq!(user.unsaved_clicks(), Some(0));
    }

    #[test]
    fn test_chunks_keep_most_recent() {
        let mut user = record();

        for chunk in 1..=(MAX_CLICK_CHUNKS as i64 + 5) {
            apply(&mut user, &UserPatch::sync(chunk, 0)).unwrap();
        }

        assert_eq!(user.click_chunks.len(), MAX_CLICK_CHUNKS);
        assert_eq!(user.click_chunks.first(), Some(&6));
        assert_eq!(user.click_chunks.last(), Some(&(MAX_CLICK_CHUNKS as i64 + 5)));
    }

    #[test]
    fn test_overflowing_increment_is_skipped() {
        let mut user = record();
        apply(&mut user, &UserPatch::clicks("Alice", i64::MIN, Utc::now())).unwrap();

        let err = apply(&mut user, &UserPatch::clicks("Bob", -1, Utc::now())).unwrap_err();

        assert!(matches!(err, StoreError::Redis(_)));
        assert_eq!(user.current_clicks, i64::MIN);
        assert_eq!(user.name, "Bob");
    }
}
