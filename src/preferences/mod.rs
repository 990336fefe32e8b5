//! Listing and theme preferences.
//!
//! Preferences live in the local [`Cache`] under [`keys::PREFERENCES`] and
//! are mirrored to a remote [`PreferencesStore`]. [`PreferencesService::sync`]
//! reconciles the two copies: whichever was written last wins.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::{PostdeckError, Result};
use crate::cache::{keys, Cache};
use crate::domain::{validate_page, validate_page_size, Filters, Pagination};
use crate::store::PreferencesStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(PostdeckError::validation(
                "theme",
                format!("Invalid theme: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub filters: Filters,
    pub pagination: Pagination,
    pub theme: Theme,
    /// Remote write stamp in milliseconds, absent for local-only copies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Preferences {
    pub fn validate(&self) -> Result<()> {
        validate_page(self.pagination.current_page)?;
        validate_page_size(self.pagination.items_per_page)?;
        Ok(())
    }
}

/// Local persistence and remote reconciliation of [`Preferences`].
#[derive(Clone)]
pub struct PreferencesService {
    cache: Cache,
    remote: Option<Arc<dyn PreferencesStore>>,
}

impl PreferencesService {
    pub fn new(cache: Cache, remote: Option<Arc<dyn PreferencesStore>>) -> Self {
        Self { cache, remote }
    }

    /// Cached preferences, or defaults when missing or invalid.
    pub fn load_local(&self) -> Preferences {
        match self.cache.get::<Preferences>(keys::PREFERENCES, true) {
            Some(prefs) => match prefs.validate() {
                Ok(()) => prefs,
                Err(e) => {
                    warn!("Ignoring invalid cached preferences: {}", e);
                    Preferences::default()
                }
            },
            None => Preferences::default(),
        }
    }

    pub fn store_local(&self, prefs: &Preferences) {
        self.cache.set(keys::PREFERENCES, prefs);
    }

    pub fn reset_local(&self) {
        self.cache.clear(keys::PREFERENCES);
    }

    /// Reconcile the cached copy with the remote one for `user_id`.
    ///
    /// The remote copy replaces the local one when its `updated_at` is later
    /// than the local cache write. Otherwise a local copy is pushed.
    pub async fn sync(&self, user_id: &str) -> Result<Preferences> {
        let Some(remote) = &self.remote else {
            return Ok(self.load_local());
        };

        let local = self
            .cache
            .get::<Preferences>(keys::PREFERENCES, true)
            .filter(|p| p.validate().is_ok());
        let local_stamp = self.cache.get_timestamp(keys::PREFERENCES);
        let stored = remote
            .load_preferences(user_id)
            .await?
            .filter(|p| p.validate().is_ok());

        match (local, stored) {
            (Some(local), Some(stored))
                if stored.updated_at.unwrap_or(0) <= local_stamp.unwrap_or(0) =>
            {
                debug!("Local preferences are newer, pushing");
                self.push(remote.as_ref(), user_id, local).await
            }
            (_, Some(stored)) => {
                debug!("Remote preferences are newer, adopting");
                self.store_local(&stored);
                Ok(stored)
            }
            (Some(local), None) => self.push(remote.as_ref(), user_id, local).await,
            (None, None) => Ok(Preferences::default()),
        }
    }

    async fn push(
        &self,
        remote: &dyn PreferencesStore,
        user_id: &str,
        mut prefs: Preferences,
    ) -> Result<Preferences> {
        let stamp = remote.save_preferences(user_id, &prefs).await?;
        prefs.updated_at = Some(stamp);
        self.store_local(&prefs);
        Ok(prefs)
    }
}
