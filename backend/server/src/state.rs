use std::sync::Arc;

use tracing::{error, info};

use super::{
    config::Config,
    database::RedisUserStore,
    error::StoreError,
    user::UserRepository,
};

pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserRepository>,
}

impl AppState {
    /// Opens the Redis store. A bad URL is fatal, an unreachable server is only logged.
    pub async fn new(config: Config) -> Result<Arc<Self>, StoreError> {
        let store = RedisUserStore::open(&config.redis_url, &config.key_prefix)?;

        match store.connect().await {
            Ok(_) => info!("Redis connected"),
            Err(e) => error!("Redis connection failed, store calls will fail until it is reachable: {e}"),
        }

        Ok(Self::with_repository(config, Arc::new(store)))
    }

    pub fn with_repository(config: Config, users: Arc<dyn UserRepository>) -> Arc<Self> {
        Arc::new(Self { config, users })
    }
}
