use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::app::error::{PostdeckError, Result};
use crate::cache::{Cache, KeyValueStore, MemoryKv, SqliteKv};
use crate::config::Config;
use crate::domain::CurrentUser;
use crate::engine::PostEngine;
use crate::external::{ExternalPostStore, HttpRestClient, RestClient};
use crate::preferences::{Preferences, PreferencesService};
use crate::remote::RemotePostStore;
use crate::store::{PreferencesStore, SqliteStore};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub cache: Cache,
    pub remote: Arc<RemotePostStore>,
    pub external: Arc<ExternalPostStore>,
    pub preferences: PreferencesService,
}

impl AppContext {
    pub fn new(config: Config, db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let kv: Arc<dyn KeyValueStore> = Arc::new(
            SqliteKv::new(Self::default_cache_path()?)?.with_capacity(config.cache.max_entries),
        );
        let client: Arc<dyn RestClient> = Arc::new(HttpRestClient::new(
            &config.external.base_url,
            Duration::from_secs(config.external.timeout_secs),
        )?);

        Ok(Self::assemble(config, store, kv, client))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let kv: Arc<dyn KeyValueStore> = match config.cache.max_entries {
            Some(cap) => Arc::new(MemoryKv::with_capacity(cap)),
            None => Arc::new(MemoryKv::new()),
        };
        let client: Arc<dyn RestClient> = Arc::new(HttpRestClient::new(
            &config.external.base_url,
            Duration::from_secs(config.external.timeout_secs),
        )?);

        Ok(Self::assemble(config, store, kv, client))
    }

    /// Wire the adapters around an existing store, cache backend and REST
    /// client.
    pub fn assemble(
        config: Config,
        store: Arc<SqliteStore>,
        kv: Arc<dyn KeyValueStore>,
        client: Arc<dyn RestClient>,
    ) -> Self {
        let cache = Cache::new(kv, config.cache_ttl());
        let remote = Arc::new(
            RemotePostStore::new(store.clone(), cache.clone())
                .with_fallback_scan_batches(config.listing.fallback_scan_batches),
        );
        let external = Arc::new(
            ExternalPostStore::new(client).with_count_limits(
                config.external.count_page_size,
                config.external.max_count_pages,
            ),
        );
        let remote_prefs: Arc<dyn PreferencesStore> = store.clone();
        let preferences = PreferencesService::new(cache.clone(), Some(remote_prefs));

        Self {
            config,
            store,
            cache,
            remote,
            external,
            preferences,
        }
    }

    /// Engine for `user`, starting from `prefs`.
    pub fn engine(&self, user: Option<CurrentUser>, prefs: Preferences) -> PostEngine {
        PostEngine::new(
            self.remote.clone(),
            self.external.clone(),
            self.preferences.clone(),
            self.config.retry_policy(),
            self.config.engine_settings(),
            user,
            prefs,
        )
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| PostdeckError::Config("Could not find data directory".into()))?;
        let postdeck_dir = data_dir.join("postdeck");
        std::fs::create_dir_all(&postdeck_dir)?;
        Ok(postdeck_dir.join("postdeck.db"))
    }

    fn default_cache_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| PostdeckError::Config("Could not find cache directory".into()))?;
        let postdeck_dir = cache_dir.join("postdeck");
        std::fs::create_dir_all(&postdeck_dir)?;
        Ok(postdeck_dir.join("cache.db"))
    }
}
