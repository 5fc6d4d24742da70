use std::sync::Arc;

use crate::{
    auth::{jwt::TokenIssuer, password::PasswordHasher},
    config::AppConfig,
    db::{self, SqliteStore},
    storage::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub tokens: TokenIssuer,
    pub hasher: Arc<PasswordHasher>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::connect(&config.database).await?;
        let store = Arc::new(SqliteStore::new(db)) as Arc<dyn Store>;
        Self::from_parts(store, config)
    }

    pub fn from_parts(store: Arc<dyn Store>, config: AppConfig) -> anyhow::Result<Self> {
        let tokens = TokenIssuer::from_config(&config.jwt);
        let hasher = Arc::new(PasswordHasher::new(&config.hashing)?);
        Ok(Self {
            store,
            config: Arc::new(config),
            tokens,
            hasher,
        })
    }

    /// In-memory store with [`AppConfig::fake`] settings.
    #[cfg(test)]
    pub async fn fake() -> Self {
        Self::fake_with(AppConfig::fake()).await
    }

    #[cfg(test)]
    pub async fn fake_with(config: AppConfig) -> Self {
        let db = db::connect_in_memory().await.expect("in-memory db");
        let store = Arc::new(SqliteStore::new(db)) as Arc<dyn Store>;
        Self::from_parts(store, config).expect("fake state")
    }
}
