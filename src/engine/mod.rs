//! Post aggregation and pagination engine.
//!
//! [`PostEngine`] owns the listing state of every scope, the selection set
//! and the bulk-delete progress record. State is changed only by the
//! engine's own methods; readers get clones or subscribe to
//! [`ListingSnapshot`]s. Locks are never held across an await.
//!
//! Every page fetch takes a fresh generation number. A response is applied
//! only if its generation is still the latest one issued for its scope, so
//! a slow response can never overwrite a newer one.

pub mod state;

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::app::{PostdeckError, Result};
use crate::bulk::{
    BulkDeleteCoordinator, BulkDeleteRequest, CancelSignal, DeleteOutcome, RetryPolicy,
    DEFAULT_CONCURRENCY, DEFAULT_EXTERNAL_CHUNK, DEFAULT_INTERNAL_CHUNK, DEFAULT_MAX_RETRIES,
};
use crate::domain::{
    normalize_search, require_elevated, require_user, validate_page, validate_page_size,
    CurrentUser, Cursor, DeleteProgress, ListingKey, Post, PostDraft, Scope, SortField, SortOrder,
};
use crate::external::ExternalPostStore;
use crate::preferences::{Preferences, PreferencesService};
use crate::remote::{ListRequest, RemotePostStore};

pub use state::{EngineState, FetchStatus, ListingSnapshot, ScopeSlice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub internal_chunk_size: usize,
    pub external_chunk_size: usize,
    pub max_retries: u32,
    pub concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            internal_chunk_size: DEFAULT_INTERNAL_CHUNK,
            external_chunk_size: DEFAULT_EXTERNAL_CHUNK,
            max_retries: DEFAULT_MAX_RETRIES,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchState {
    pub status: FetchStatus,
    pub error: Option<String>,
    pub page: u32,
    pub has_more: bool,
}

struct FetchPlan {
    scope: Scope,
    key: ListingKey,
    target: u32,
    start_page: u32,
    start_cursor: Option<Cursor>,
    needs_total: bool,
}

struct Loaded {
    items: Vec<Post>,
    page: u32,
    /// `(page, next_cursor, has_more)` for every page walked.
    records: Vec<(u32, Option<Cursor>, bool)>,
    total: Option<u64>,
    authorized_total: Option<u64>,
}

pub struct PostEngine {
    remote: Arc<RemotePostStore>,
    external: Arc<ExternalPostStore>,
    coordinator: BulkDeleteCoordinator,
    preferences: PreferencesService,
    settings: EngineSettings,
    user: RwLock<Option<CurrentUser>>,
    state: Mutex<EngineState>,
    snapshots: watch::Sender<ListingSnapshot>,
}

impl PostEngine {
    pub fn new(
        remote: Arc<RemotePostStore>,
        external: Arc<ExternalPostStore>,
        preferences: PreferencesService,
        policy: RetryPolicy,
        settings: EngineSettings,
        user: Option<CurrentUser>,
        prefs: Preferences,
    ) -> Self {
        let coordinator = BulkDeleteCoordinator::new(remote.clone(), external.clone(), policy);
        let (snapshots, _) = watch::channel(ListingSnapshot {
            scope: prefs.filters.option,
            page: prefs.pagination.current_page,
            ..Default::default()
        });

        Self {
            remote,
            external,
            coordinator,
            preferences,
            settings,
            user: RwLock::new(user),
            state: Mutex::new(EngineState::new(prefs)),
            snapshots,
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the signed-in user and drop everything loaded for the old one.
    pub fn set_user(&self, user: Option<CurrentUser>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
        let mut state = self.state();
        state.slices.clear();
        state.selection.clear();
        state.overlay.clear();
        state.select_generation += 1;
        self.publish(&state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ListingSnapshot> {
        self.snapshots.subscribe()
    }

    fn publish(&self, state: &EngineState) {
        let user = self.current_user();
        let slice = state.current_slice();
        self.snapshots.send_replace(ListingSnapshot {
            scope: state.scope(),
            status: slice.map(|s| s.status).unwrap_or_default(),
            page: state.preferences.pagination.current_page,
            items: state.visible_page(user.as_ref().map(|u| u.id.as_str())),
            total: slice.and_then(|s| s.total),
            has_more: slice.is_some_and(|s| s.cursors.has_more()),
            selected: state.selection.len(),
            progress: state.progress.clone(),
            error: slice.and_then(|s| s.error.clone()),
        });
    }

    /// Apply `f` to the state, then persist preferences and notify readers.
    /// `f` must validate before it changes anything.
    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut EngineState) -> Result<()>,
    {
        let mut state = self.state();
        f(&mut *state)?;
        self.preferences.store_local(&state.preferences);
        self.publish(&state);
        Ok(())
    }

    // Filters and pagination

    pub fn preferences(&self) -> Preferences {
        self.state().preferences.clone()
    }

    pub async fn set_search(&self, text: &str) -> Result<()> {
        self.mutate(|state| {
            state.preferences.filters.search = text.to_string();
            state.preferences.pagination.current_page = 1;
            Ok(())
        })?;
        self.refresh().await
    }

    /// Change the ordering. The page number is kept; the listing is walked
    /// again from page 1 under the new ordering.
    pub async fn set_sort(&self, sort_by: SortField, sort_order: SortOrder) -> Result<()> {
        self.mutate(|state| {
            state.preferences.filters.sort_by = sort_by;
            state.preferences.filters.sort_order = sort_order;
            Ok(())
        })?;
        self.refresh().await
    }

    pub async fn set_scope(&self, scope: Scope) -> Result<()> {
        self.mutate(|state| {
            if state.scope() != scope {
                Self::leave_scope(state);
                state.preferences.filters.option = scope;
                state.preferences.pagination.current_page = 1;
            }
            Ok(())
        })?;
        self.refresh().await
    }

    /// Adopt `prefs` wholesale without fetching. The caller refreshes.
    pub fn replace_preferences(&self, prefs: Preferences) -> Result<()> {
        prefs.validate()?;
        self.mutate(|state| {
            if state.scope() != prefs.filters.option {
                Self::leave_scope(state);
            }
            state.preferences = prefs;
            Ok(())
        })
    }

    fn leave_scope(state: &mut EngineState) {
        let previous = state.scope();
        state.slices.remove(&previous);
        state.selection.clear();
        state.overlay.clear();
        state.select_generation += 1;
    }

    pub async fn set_page(&self, page: u32) -> Result<()> {
        let page = validate_page(page)?;
        self.mutate(|state| {
            state.preferences.pagination.current_page = page;
            Ok(())
        })?;
        self.refresh().await
    }

    pub async fn set_items_per_page(&self, size: usize) -> Result<()> {
        let size = validate_page_size(size)?;
        self.mutate(|state| {
            state.preferences.pagination.items_per_page = size;
            state.preferences.pagination.current_page = 1;
            Ok(())
        })?;
        self.refresh().await
    }

    /// Fetch the current page of the current scope.
    ///
    /// A failure is stored on the scope and returned; previously loaded
    /// items stay in place.
    pub async fn refresh(&self) -> Result<()> {
        let user = self.current_user();
        let (plan, generation) = {
            let mut state = self.state();
            let prefs = state.preferences.clone();
            let scope = prefs.filters.option;
            let key = ListingKey::new(&prefs.filters, &prefs.pagination);
            let target = prefs.pagination.current_page.max(1);
            let generation = state.next_generation();

            let slice = state.slice_mut(scope);
            slice.rekey(&key);
            slice.generation = generation;
            slice.status = FetchStatus::Loading;
            let (start_page, start_cursor) = slice.cursors.nearest_start(target);
            let plan = FetchPlan {
                scope,
                key,
                target,
                start_page,
                start_cursor,
                needs_total: slice.total.is_none(),
            };
            self.publish(&state);
            (plan, generation)
        };

        let result = self.load(user.as_ref(), &plan).await;
        self.commit(&plan, generation, result)
    }

    async fn load(&self, user: Option<&CurrentUser>, plan: &FetchPlan) -> Result<Loaded> {
        let user = require_user(user)?;
        let key = &plan.key;
        let search = key.search.as_deref();

        if plan.scope.is_external() {
            let page = self
                .external
                .list_page(plan.target, key.page_size, key.sort_by, key.sort_order, search)
                .await?;
            let (total, authorized_total) = if plan.needs_total {
                let total = match page.total {
                    Some(total) => total,
                    None => self.external.count_total(search).await?,
                };
                (Some(total), Some(if user.is_elevated() { total } else { 0 }))
            } else {
                (None, None)
            };
            return Ok(Loaded {
                items: page.items,
                page: plan.target,
                records: vec![(plan.target, None, page.has_more)],
                total,
                authorized_total,
            });
        }

        let owner = match plan.scope {
            Scope::Created => Some(user.id.clone()),
            _ => None,
        };
        let mut page = plan.start_page;
        let mut cursor = plan.start_cursor.clone();
        let mut records = Vec::new();

        let items = loop {
            let request = ListRequest {
                scope: plan.scope,
                sort_by: key.sort_by,
                sort_order: key.sort_order,
                cursor: cursor.take(),
                page_size: key.page_size,
                owner_id: owner.clone(),
                search: key.search.clone(),
            };
            let fetched = self.remote.list_page(&request).await?;
            records.push((page, fetched.next_cursor.clone(), fetched.has_more));

            if page >= plan.target || !fetched.has_more {
                break fetched.items;
            }
            debug!("Walking past page {} towards page {}", page, plan.target);
            cursor = fetched.next_cursor;
            page += 1;
        };

        let (total, authorized_total) = if plan.needs_total {
            let total = self
                .remote
                .count_matching(plan.scope, owner.as_deref(), search)
                .await?;
            let authorized = if plan.scope == Scope::All && !user.is_elevated() {
                self.remote
                    .count_matching(Scope::All, Some(&user.id), search)
                    .await?
            } else {
                total
            };
            (Some(total), Some(authorized))
        } else {
            (None, None)
        };

        Ok(Loaded {
            items,
            page,
            records,
            total,
            authorized_total,
        })
    }

    fn commit(&self, plan: &FetchPlan, generation: u64, result: Result<Loaded>) -> Result<()> {
        let mut state = self.state();
        let slice = state.slice_mut(plan.scope);
        if slice.generation != generation || slice.key.as_ref() != Some(&plan.key) {
            debug!(
                "Discarding stale {} page (generation {}, latest {})",
                plan.scope, generation, slice.generation
            );
            return Ok(());
        }

        match result {
            Ok(loaded) => {
                for (page, next, has_more) in loaded.records {
                    slice.cursors.record(page, next, has_more);
                }
                slice.items = loaded.items;
                slice.page = loaded.page;
                if loaded.total.is_some() {
                    slice.total = loaded.total;
                    slice.authorized_total = loaded.authorized_total;
                }
                slice.status = FetchStatus::Succeeded;
                slice.error = None;

                if loaded.page != plan.target && state.scope() == plan.scope {
                    debug!("Page {} does not exist, showing {}", plan.target, loaded.page);
                    state.preferences.pagination.current_page = loaded.page;
                    self.preferences.store_local(&state.preferences);
                }
                state.settle_overlay(generation, plan.scope.is_external());
                self.publish(&state);
                Ok(())
            }
            Err(e) => {
                slice.status = FetchStatus::Failed;
                slice.error = Some(e.to_string());
                self.publish(&state);
                Err(e)
            }
        }
    }

    // Read accessors

    pub fn get_visible_page(&self) -> Vec<Post> {
        let user = self.current_user();
        self.state()
            .visible_page(user.as_ref().map(|u| u.id.as_str()))
    }

    pub fn get_total_for_scope(&self) -> Option<u64> {
        self.state().current_slice().and_then(|s| s.total)
    }

    pub fn get_authorized_total(&self) -> Option<u64> {
        self.state().current_slice().and_then(|s| s.authorized_total)
    }

    pub fn get_selection(&self) -> Vec<String> {
        self.state().selection.iter().cloned().collect()
    }

    pub fn get_delete_progress(&self) -> Option<DeleteProgress> {
        self.state().progress.clone()
    }

    pub fn get_fetch_status(&self) -> FetchState {
        let state = self.state();
        let slice = state.current_slice();
        FetchState {
            status: slice.map(|s| s.status).unwrap_or_default(),
            error: slice.and_then(|s| s.error.clone()),
            page: state.preferences.pagination.current_page,
            has_more: slice.is_some_and(|s| s.cursors.has_more()),
        }
    }

    pub fn clear_error(&self) {
        let mut state = self.state();
        let scope = state.scope();
        if let Some(slice) = state.slices.get_mut(&scope) {
            slice.error = None;
        }
        self.publish(&state);
    }

    /// Forget a finished progress record.
    pub fn dismiss_progress(&self) {
        let mut state = self.state();
        if state.progress.as_ref().is_some_and(|p| !p.running) {
            state.progress = None;
            self.publish(&state);
        }
    }

    // Selection

    /// Toggle `id` in the selection, returning whether it is now selected.
    pub fn toggle_select(&self, id: &str) -> Result<bool> {
        let user = self.current_user();
        let user = require_user(user.as_ref())?;

        let mut state = self.state();
        let visible = state.visible_page(Some(&user.id));
        let post = visible
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| PostdeckError::PostNotFound(id.to_string()))?;
        if !user.can_mutate(post) {
            return Err(PostdeckError::Unauthorized(format!(
                "not permitted to select post {}",
                id
            )));
        }

        let selected = if state.selection.remove(id) {
            false
        } else {
            state.selection.insert(id.to_string());
            true
        };
        self.publish(&state);
        Ok(selected)
    }

    /// Select every post in the current scope the user may act on, across
    /// all pages.
    ///
    /// The authorized total stays the counted one. When the id walk comes
    /// back short of it, the selection is partial and
    /// [`is_all_selected`](Self::is_all_selected) stays false.
    pub async fn select_all(&self) -> Result<usize> {
        let user = self.current_user();
        let user = require_user(user.as_ref())?;

        let (generation, scope, search, known_total) = {
            let mut state = self.state();
            state.select_generation += 1;
            let search = normalize_search(&state.preferences.filters.search).map(String::from);
            let known_total = state.current_slice().and_then(|s| s.authorized_total);
            (state.select_generation, state.scope(), search, known_total)
        };
        let search = search.as_deref();
        let authorized = match known_total {
            Some(total) => total,
            None => self.authorized_count(user, scope, search).await?,
        };

        let ids = match scope {
            Scope::External if user.is_elevated() => self.external.list_all_ids(search).await?,
            Scope::External => Vec::new(),
            Scope::Created => {
                self.remote
                    .list_ids(Scope::Created, Some(&user.id), search)
                    .await?
            }
            Scope::All => {
                let owner = (!user.is_elevated()).then_some(user.id.as_str());
                self.remote.list_ids(Scope::All, owner, search).await?
            }
        };

        let mut state = self.state();
        if state.select_generation != generation || state.scope() != scope {
            debug!("Discarding stale select-all for {}", scope);
            return Ok(state.selection.len());
        }
        state.selection = ids.into_iter().collect();
        let count = state.selection.len();
        if (count as u64) < authorized {
            warn!(
                "Select-all in {} listed {} of {} authorized posts",
                scope, count, authorized
            );
        }
        state.slice_mut(scope).authorized_total = Some(authorized.max(count as u64));
        self.publish(&state);
        Ok(count)
    }

    async fn authorized_count(
        &self,
        user: &CurrentUser,
        scope: Scope,
        search: Option<&str>,
    ) -> Result<u64> {
        match scope {
            Scope::External if user.is_elevated() => self.external.count_total(search).await,
            Scope::External => Ok(0),
            Scope::Created => {
                self.remote
                    .count_matching(Scope::Created, Some(&user.id), search)
                    .await
            }
            Scope::All => {
                let owner = (!user.is_elevated()).then_some(user.id.as_str());
                self.remote.count_matching(Scope::All, owner, search).await
            }
        }
    }

    pub fn clear_selection(&self) {
        let mut state = self.state();
        state.select_generation += 1;
        state.selection.clear();
        self.publish(&state);
    }

    /// Whether the selection covers every post the user may act on in the
    /// current scope, not just the visible page.
    pub fn is_all_selected(&self) -> bool {
        let state = self.state();
        match state.current_slice().and_then(|s| s.authorized_total) {
            Some(total) => total > 0 && state.selection.len() as u64 == total,
            None => false,
        }
    }

    // Mutations

    pub async fn delete_selected(&self) -> Result<DeleteOutcome> {
        let (ids, external) = {
            let state = self.state();
            let ids: Vec<String> = state.selection.iter().cloned().collect();
            (ids, state.scope().is_external())
        };
        if ids.is_empty() {
            return Err(PostdeckError::validation("selection", "Nothing selected"));
        }
        self.run_delete(ids, external, None).await
    }

    pub async fn delete_one(&self, id: &str) -> Result<DeleteOutcome> {
        let user = self.current_user();
        let user = require_user(user.as_ref())?;

        let (visible, external_scope) = {
            let state = self.state();
            let visible = state
                .visible_page(Some(&user.id))
                .into_iter()
                .find(|p| p.id == id);
            (visible, state.scope().is_external())
        };
        let post = match visible {
            Some(post) => post,
            None if !external_scope => self.remote.get_by_id(id).await?,
            None => return Err(PostdeckError::PostNotFound(id.to_string())),
        };
        if !user.can_mutate(&post) {
            return Err(PostdeckError::Unauthorized(format!(
                "not permitted to delete post {}",
                id
            )));
        }

        self.run_delete(vec![post.id], post.is_external, None).await
    }

    /// Delete the given ids from one source without selecting them first.
    pub async fn delete_ids(&self, ids: Vec<String>, external: bool) -> Result<DeleteOutcome> {
        if ids.is_empty() {
            return Err(PostdeckError::validation("ids", "No ids given"));
        }
        self.run_delete(ids, external, None).await
    }

    /// Re-run the last bulk delete for `ids`, which must all be listed in
    /// the current failed items. The returned outcome covers `ids` only; the
    /// stored progress keeps the failures that were not retried.
    pub async fn retry_failed(&self, ids: &[String]) -> Result<DeleteOutcome> {
        let (external, previous) = {
            let state = self.state();
            let progress = state
                .progress
                .as_ref()
                .filter(|p| !p.running)
                .ok_or_else(|| PostdeckError::validation("ids", "No finished delete to retry"))?;
            let failed: HashSet<String> = progress.failed_ids().into_iter().collect();
            if ids.is_empty() || ids.iter().any(|id| !failed.contains(id)) {
                return Err(PostdeckError::validation(
                    "ids",
                    "Only failed items can be retried",
                ));
            }
            (state.last_delete_external, progress.clone())
        };
        self.run_delete(ids.to_vec(), external, Some(previous)).await
    }

    /// Ask a running bulk delete to stop after the chunk or item in flight.
    pub fn cancel_bulk_delete(&self) -> bool {
        match &self.state().bulk_cancel {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_delete(
        &self,
        ids: Vec<String>,
        external: bool,
        previous: Option<DeleteProgress>,
    ) -> Result<DeleteOutcome> {
        let user = self.current_user();
        if external {
            require_elevated(user.as_ref())?;
        } else {
            self.check_owned(user.as_ref(), &ids).await?;
        }

        let cancel = CancelSignal::new();
        {
            let mut state = self.state();
            if state.progress.as_ref().is_some_and(|p| p.running) {
                return Err(PostdeckError::Other(
                    "a bulk delete is already running".into(),
                ));
            }
            state.bulk_cancel = Some(cancel.clone());
            state.last_delete_external = external;
            state.progress = Some(DeleteProgress::started(ids.len()));
            self.publish(&state);
        }

        let request = BulkDeleteRequest {
            ids,
            is_external: external,
            chunk_size: if external {
                self.settings.external_chunk_size
            } else {
                self.settings.internal_chunk_size
            },
            concurrency_hint: self.settings.concurrency,
            max_retries: self.settings.max_retries,
        };
        let on_progress = |progress: &DeleteProgress| {
            let mut state = self.state();
            state.progress = Some(progress.clone());
            self.publish(&state);
        };

        let result = self
            .coordinator
            .delete_in_batches(user.as_ref(), request, &cancel, &on_progress)
            .await;

        let mut state = self.state();
        state.bulk_cancel = None;
        match result {
            Ok(outcome) => {
                Self::apply_deleted(&mut *state, &outcome.succeeded_ids, external);
                let progress = match previous {
                    Some(mut merged) => {
                        merged.absorb_retry(&outcome.progress, &outcome.succeeded_ids);
                        merged
                    }
                    None => outcome.progress.clone(),
                };
                state.progress = Some(progress);
                self.publish(&state);
                Ok(outcome)
            }
            Err(e) => {
                if previous.is_some() {
                    state.progress = previous;
                } else if let Some(progress) = state.progress.as_mut() {
                    progress.finish();
                }
                self.publish(&state);
                Err(e)
            }
        }
    }

    /// Standard users may only delete internal posts they own.
    async fn check_owned(&self, user: Option<&CurrentUser>, ids: &[String]) -> Result<()> {
        let user = require_user(user)?;
        if user.is_elevated() {
            return Ok(());
        }
        let owned: HashSet<String> = self
            .remote
            .list_ids(Scope::Created, Some(&user.id), None)
            .await?
            .into_iter()
            .collect();
        if let Some(id) = ids.iter().find(|id| !owned.contains(*id)) {
            return Err(PostdeckError::Unauthorized(format!(
                "not permitted to delete post {}",
                id
            )));
        }
        Ok(())
    }

    fn apply_deleted(state: &mut EngineState, ids: &[String], external: bool) {
        if ids.is_empty() {
            return;
        }
        let removed: BTreeSet<String> = ids.iter().cloned().collect();
        let current = state.scope();

        for (scope, slice) in state.slices.iter_mut() {
            if scope.is_external() != external {
                continue;
            }
            slice.remove_ids(&removed);
            if *scope == current {
                slice.decrement_totals(removed.len() as u64);
            } else {
                slice.total = None;
                slice.authorized_total = None;
            }
        }
        state.selection.retain(|id| !removed.contains(id));
        state
            .overlay
            .retain(|w| w.post.is_external != external || !removed.contains(&w.post.id));
    }

    // Posts

    /// Create a post in the chosen source. It shows on the first page at
    /// once and stays there until a later fetch confirms it.
    pub async fn create_post(&self, draft: PostDraft, external: bool) -> Result<Post> {
        let user = self.current_user();
        let current = require_user(user.as_ref())?;

        let post = if external {
            self.external.create(user.as_ref(), &draft).await?
        } else {
            let post = draft.into_internal(current)?;
            self.remote.upsert(&post).await?;
            post
        };

        let mut state = self.state();
        for (scope, slice) in state.slices.iter_mut() {
            let counted = match scope {
                Scope::External => post.is_external,
                Scope::All => !post.is_external,
                Scope::Created => !post.is_external && post.is_owned_by(&current.id),
            };
            if counted {
                slice.total = slice.total.map(|t| t + 1);
                slice.authorized_total = slice.authorized_total.map(|t| t + 1);
            }
        }
        state.push_overlay(post.clone());
        self.publish(&state);
        Ok(post)
    }

    /// Replace title and content of post `id` in the given source.
    pub async fn update_post(&self, id: &str, external: bool, draft: PostDraft) -> Result<Post> {
        draft.validate()?;
        let user = self.current_user();
        let current = require_user(user.as_ref())?;

        let known = {
            let state = self.state();
            state
                .visible_page(Some(&current.id))
                .into_iter()
                .find(|p| p.id == id)
        };
        let existing = match known {
            Some(post) => post,
            None if !external => self.remote.get_by_id(id).await?,
            None => return Err(PostdeckError::PostNotFound(id.to_string())),
        };
        if existing.is_external != external {
            return Err(PostdeckError::CrossSourceEdit(id.to_string()));
        }
        if !current.can_mutate(&existing) {
            return Err(PostdeckError::Unauthorized(format!(
                "not permitted to edit post {}",
                id
            )));
        }

        let updated = Post {
            title: draft.title.trim().to_string(),
            content: draft.content.trim().to_string(),
            ..existing
        };
        let saved = if external {
            self.external.update(user.as_ref(), &updated).await?
        } else {
            self.remote.upsert(&updated).await?;
            updated
        };

        let mut state = self.state();
        state.push_overlay(saved.clone());
        self.publish(&state);
        Ok(saved)
    }

    /// Reconcile preferences with the remote copy, logging failures.
    ///
    /// A newer remote copy replaces the in-memory one, scope change
    /// included. Nothing is fetched; the caller refreshes.
    pub async fn sync_preferences(&self) {
        let Some(user) = self.current_user() else {
            return;
        };
        match self.preferences.sync(&user.id).await {
            Ok(prefs) if prefs.updated_at.is_some() => {
                let mut state = self.state();
                if state.preferences == prefs {
                    return;
                }
                if state.scope() != prefs.filters.option {
                    Self::leave_scope(&mut state);
                }
                state.preferences = prefs;
                self.publish(&state);
            }
            Ok(_) => {}
            Err(e) => warn!("Preferences sync failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::domain::Role;
    use crate::external::{ExternalPostDto, PageQuery, RestClient, RestPage};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoExternal;

    #[async_trait]
    impl RestClient for NoExternal {
        async fn list(&self, _query: &PageQuery) -> Result<Option<RestPage>> {
            Ok(None)
        }
        async fn create(&self, post: &ExternalPostDto) -> Result<ExternalPostDto> {
            Ok(post.clone())
        }
        async fn update(&self, _id: &str, post: &ExternalPostDto) -> Result<ExternalPostDto> {
            Ok(post.clone())
        }
        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn engine(user: CurrentUser) -> PostEngine {
        let cache = Cache::in_memory();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let remote = Arc::new(RemotePostStore::new(store, cache.clone()));
        let external = Arc::new(ExternalPostStore::new(Arc::new(NoExternal)));
        PostEngine::new(
            remote,
            external,
            PreferencesService::new(cache, None),
            RetryPolicy {
                base_backoff: Duration::ZERO,
                request_delay: Duration::ZERO,
            },
            EngineSettings::default(),
            Some(user),
            Preferences::default(),
        )
    }

    fn ann() -> CurrentUser {
        CurrentUser::new("u1", Role::User, "Ann")
    }

    #[tokio::test]
    async fn test_created_post_visible_before_refresh() {
        let engine = engine(ann());
        engine.refresh().await.unwrap();
        let post = engine
            .create_post(PostDraft::new("Hello", "World"), false)
            .await
            .unwrap();

        let page = engine.get_visible_page();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, post.id);
        assert_eq!(engine.get_total_for_scope(), Some(1));

        engine.refresh().await.unwrap();
        assert_eq!(engine.get_visible_page().len(), 1);
        assert!(engine.state().overlay.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_page_size_leaves_state() {
        let engine = engine(ann());
        assert!(engine.set_items_per_page(7).await.is_err());
        assert_eq!(engine.preferences().pagination.items_per_page, 5);
        assert!(engine.set_page(0).await.is_err());
        assert_eq!(engine.preferences().pagination.current_page, 1);
    }

    #[tokio::test]
    async fn test_mutators_persist_preferences() {
        let engine = engine(ann());
        engine.set_items_per_page(10).await.unwrap();
        engine.set_sort(SortField::Title, SortOrder::Asc).await.unwrap();
        let stored = engine.preferences.load_local();
        assert_eq!(stored.pagination.items_per_page, 10);
        assert_eq!(stored.filters.sort_by, SortField::Title);
    }

    #[tokio::test]
    async fn test_refresh_without_user_fails_and_keeps_error() {
        let engine = engine(ann());
        engine.set_user(None);
        assert!(engine.refresh().await.is_err());
        let status = engine.get_fetch_status();
        assert_eq!(status.status, FetchStatus::Failed);
        assert!(status.error.is_some());

        engine.clear_error();
        assert!(engine.get_fetch_status().error.is_none());
    }

    #[tokio::test]
    async fn test_toggle_select_requires_visible_post() {
        let engine = engine(ann());
        engine.refresh().await.unwrap();
        assert!(matches!(
            engine.toggle_select("nope"),
            Err(PostdeckError::PostNotFound(_))
        ));

        let post = engine
            .create_post(PostDraft::new("Mine", "Body"), false)
            .await
            .unwrap();
        assert!(engine.toggle_select(&post.id).unwrap());
        assert_eq!(engine.get_selection(), vec![post.id.clone()]);
        assert!(!engine.toggle_select(&post.id).unwrap());
        assert!(engine.get_selection().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_committed_page() {
        let engine = engine(ann());
        let mut rx = engine.subscribe();
        engine
            .create_post(PostDraft::new("Hello", "World"), false)
            .await
            .unwrap();
        engine.refresh().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.status, FetchStatus::Succeeded);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.total, Some(1));
    }

    #[tokio::test]
    async fn test_sync_adopts_newer_remote_preferences() {
        use crate::preferences::Theme;
        use crate::store::PreferencesStore;

        let cache = Cache::in_memory();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let remote = Arc::new(RemotePostStore::new(store.clone(), cache.clone()));
        let external = Arc::new(ExternalPostStore::new(Arc::new(NoExternal)));
        let prefs_remote: Arc<dyn PreferencesStore> = store.clone();
        let engine = PostEngine::new(
            remote,
            external,
            PreferencesService::new(cache, Some(prefs_remote)),
            RetryPolicy {
                base_backoff: Duration::ZERO,
                request_delay: Duration::ZERO,
            },
            EngineSettings::default(),
            Some(ann()),
            Preferences::default(),
        );

        let mut saved = Preferences::default();
        saved.theme = Theme::Dark;
        saved.filters.option = Scope::All;
        saved.pagination.items_per_page = 10;
        store.save_preferences("u1", &saved).await.unwrap();

        engine.sync_preferences().await;
        let prefs = engine.preferences();
        assert_eq!(prefs.theme, Theme::Dark);
        assert_eq!(prefs.filters.option, Scope::All);
        assert_eq!(prefs.pagination.items_per_page, 10);
        assert!(prefs.updated_at.is_some());
        assert_eq!(engine.subscribe().borrow().scope, Scope::All);
    }

    #[tokio::test]
    async fn test_retry_requires_failed_ids() {
        let engine = engine(ann());
        assert!(engine.retry_failed(&["x".into()]).await.is_err());
    }
}
