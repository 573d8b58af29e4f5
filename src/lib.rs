pub mod access;
pub mod api;
pub mod config;
pub mod db;
pub mod identity;
pub mod portal;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::db::SqliteIdentityStore;
use crate::identity::IdentityResolver;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub resolver: IdentityResolver,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let resolver = IdentityResolver::new(Arc::new(SqliteIdentityStore::new(db.clone())));
        Self {
            config,
            db,
            resolver,
            rate_limiter,
        }
    }

    /// Replace the identity resolver (e.g. with a different store)
    pub fn with_resolver(mut self, resolver: IdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }
}
