//! # Click Sync
//!
//! Background job folding submitted clicks into durable totals.
//!
//! Every tick, for each user:
//! 1. `delta = currentClicks - lastSavedClicks`
//! 2. If `delta > 0`: `totalClicks += delta`, push `delta` onto `clickChunks` (last 100 kept),
//!    `lastSavedClicks = currentClicks`
//! 3. Otherwise skip the user. This includes a delta too large to fit in an `i64`.
//!
//! The watermark is the `currentClicks` value read at the start of the run. Clicks submitted while
//! the run is in flight land in `currentClicks` only and are picked up by the next run.
//!
//! A store error abandons the run. Users already synced stay synced, the rest wait for the next
//! tick. Only one process may run this job against a given store.
use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info};

use crate::{
    error::StoreError,
    user::{UserPatch, UserRepository},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub synced: usize,
    pub skipped: usize,
}

pub struct ClickSync {
    users: Arc<dyn UserRepository>,
    interval: Duration,
}

impl ClickSync {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            users,
            interval: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until the returned handle is aborted. The first run happens one interval after spawning.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // interval fires immediately on the first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match self.run_once().await {
                    Ok(report) if report.synced > 0 => {
                        info!(
                            scanned = report.scanned,
                            synced = report.synced,
                            skipped = report.skipped,
                            "Clicks updated in the database"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error updating clicks: {e}");
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<SyncReport, StoreError> {
        let users = self.users.find_all().await?;

        let mut report = SyncReport {
            scanned: users.len(),
            ..SyncReport::default()
        };

        for user in users {
            let delta = match user.unsaved_clicks() {
                Some(delta) if delta > 0 => delta,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            self.users
                .create_or_update(
                    &user.telegram_id,
                    UserPatch::sync(delta, user.current_clicks),
                )
                .await?;

            debug!(telegram_id = %user.telegram_id, delta, "Synced clicks");
            report.synced += 1;
        }

        Ok(report)
    }
}
