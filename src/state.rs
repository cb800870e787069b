use crate::blockchain::processor::BatchProcessor;
use crate::cache::AddressCache;
use crate::config::Config;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub db_pool: SqlitePool,
    pub cache: Arc<AddressCache>,
    pub processor: Arc<BatchProcessor>,
}
