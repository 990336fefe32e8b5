use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::bulk::CancelSignal;
use crate::domain::{CursorMap, DeleteProgress, ListingKey, Post, Scope};
use crate::preferences::Preferences;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// Listing state of one scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeSlice {
    pub status: FetchStatus,
    pub items: Vec<Post>,
    pub page: u32,
    pub cursors: CursorMap,
    pub total: Option<u64>,
    /// Posts in this scope the current user may act on.
    pub authorized_total: Option<u64>,
    pub error: Option<String>,
    /// Generation of the latest fetch issued for this scope.
    pub generation: u64,
    /// Listing configuration the cursors were computed under.
    pub key: Option<ListingKey>,
}

impl ScopeSlice {
    /// Forget cursors and totals computed under a different configuration.
    pub fn rekey(&mut self, key: &ListingKey) {
        if self.key.as_ref() != Some(key) {
            self.cursors.clear();
            self.total = None;
            self.authorized_total = None;
            self.key = Some(key.clone());
        }
    }

    pub fn remove_ids(&mut self, ids: &BTreeSet<String>) -> usize {
        let before = self.items.len();
        self.items.retain(|p| !ids.contains(&p.id));
        before - self.items.len()
    }

    pub fn decrement_totals(&mut self, count: u64) {
        if let Some(total) = self.total.as_mut() {
            *total = total.saturating_sub(count);
        }
        if let Some(total) = self.authorized_total.as_mut() {
            *total = total.saturating_sub(count);
        }
    }
}

/// A local write not yet confirmed by a fetch.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Fetch generation current when the write was made. Any fetch issued
    /// after it supersedes the entry.
    pub generation: u64,
    pub post: Post,
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub preferences: Preferences,
    pub slices: HashMap<Scope, ScopeSlice>,
    pub selection: BTreeSet<String>,
    pub overlay: Vec<PendingWrite>,
    pub progress: Option<DeleteProgress>,
    pub bulk_cancel: Option<CancelSignal>,
    pub last_delete_external: bool,
    /// Monotonic counter shared by every page fetch.
    pub fetch_generation: u64,
    pub select_generation: u64,
}

impl EngineState {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            preferences,
            ..Default::default()
        }
    }

    pub fn scope(&self) -> Scope {
        self.preferences.filters.option
    }

    pub fn slice(&self, scope: Scope) -> Option<&ScopeSlice> {
        self.slices.get(&scope)
    }

    pub fn slice_mut(&mut self, scope: Scope) -> &mut ScopeSlice {
        self.slices.entry(scope).or_default()
    }

    pub fn current_slice(&self) -> Option<&ScopeSlice> {
        self.slice(self.scope())
    }

    pub fn next_generation(&mut self) -> u64 {
        self.fetch_generation += 1;
        self.fetch_generation
    }

    /// Current page with pending writes merged on top.
    pub fn visible_page(&self, user_id: Option<&str>) -> Vec<Post> {
        let scope = self.scope();
        let Some(slice) = self.slice(scope) else {
            return Vec::new();
        };

        let search = crate::domain::normalize_search(&self.preferences.filters.search);
        let accepts = |post: &Post| {
            let source_matches = match scope {
                Scope::External => post.is_external,
                Scope::All => !post.is_external,
                Scope::Created => {
                    !post.is_external && user_id.is_some_and(|id| post.is_owned_by(id))
                }
            };
            source_matches && search.map_or(true, |term| post.title.starts_with(term))
        };

        let mut items: Vec<Post> = slice
            .items
            .iter()
            .map(|item| {
                self.overlay
                    .iter()
                    .rev()
                    .find(|w| w.post.id == item.id && w.post.is_external == item.is_external)
                    .map(|w| w.post.clone())
                    .unwrap_or_else(|| item.clone())
            })
            .collect();

        if slice.page <= 1 {
            let mut fresh: Vec<Post> = Vec::new();
            for write in self.overlay.iter().rev() {
                let post = &write.post;
                let known = items.iter().chain(fresh.iter()).any(|p| p.id == post.id);
                if !known && accepts(post) {
                    fresh.push(post.clone());
                }
            }
            fresh.extend(items);
            items = fresh;
        }

        items
    }

    /// Drop pending writes for `external` posts made before `generation`.
    pub fn settle_overlay(&mut self, generation: u64, external: bool) {
        self.overlay
            .retain(|w| w.post.is_external != external || w.generation >= generation);
    }

    pub fn push_overlay(&mut self, post: Post) {
        let generation = self.fetch_generation;
        self.overlay
            .retain(|w| !(w.post.id == post.id && w.post.is_external == post.is_external));
        self.overlay.push(PendingWrite { generation, post });
    }
}

/// Read-only view published to subscribers after each state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSnapshot {
    pub scope: Scope,
    pub status: FetchStatus,
    pub page: u32,
    pub items: Vec<Post>,
    pub total: Option<u64>,
    pub has_more: bool,
    pub selected: usize,
    pub progress: Option<DeleteProgress>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Filters, Pagination};

    fn post(id: &str, owner: &str) -> Post {
        let mut post = Post::new_internal("Title", "Body", owner, "Ann");
        post.id = id.into();
        post
    }

    fn state_with_page(items: Vec<Post>) -> EngineState {
        let mut state = EngineState::new(Preferences::default());
        let slice = state.slice_mut(Scope::Created);
        slice.items = items;
        slice.page = 1;
        state
    }

    #[test]
    fn test_rekey_clears_only_on_change() {
        let key = ListingKey::new(&Filters::default(), &Pagination::default());
        let mut slice = ScopeSlice::default();
        slice.rekey(&key);
        slice.total = Some(3);
        slice.rekey(&key);
        assert_eq!(slice.total, Some(3));

        let mut filters = Filters::default();
        filters.search = "x".into();
        slice.rekey(&ListingKey::new(&filters, &Pagination::default()));
        assert_eq!(slice.total, None);
    }

    #[test]
    fn test_overlay_prepends_new_posts_on_first_page() {
        let mut state = state_with_page(vec![post("a", "u1")]);
        state.push_overlay(post("new", "u1"));
        let ids: Vec<String> = state
            .visible_page(Some("u1"))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["new", "a"]);
    }

    #[test]
    fn test_overlay_replaces_edited_post() {
        let mut state = state_with_page(vec![post("a", "u1")]);
        let mut edited = post("a", "u1");
        edited.title = "Edited".into();
        state.push_overlay(edited);
        let page = state.visible_page(Some("u1"));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Edited");
    }

    #[test]
    fn test_overlay_respects_scope() {
        let mut state = state_with_page(vec![]);
        state.push_overlay(post("theirs", "u2"));
        assert!(state.visible_page(Some("u1")).is_empty());
    }

    #[test]
    fn test_settle_overlay_by_generation() {
        let mut state = state_with_page(vec![]);
        state.push_overlay(post("a", "u1"));
        let generation = state.next_generation();
        state.settle_overlay(generation, false);
        assert!(state.overlay.is_empty());
    }

    #[test]
    fn test_decrement_totals_saturates() {
        let mut slice = ScopeSlice {
            total: Some(2),
            authorized_total: Some(1),
            ..Default::default()
        };
        slice.decrement_totals(3);
        assert_eq!(slice.total, Some(0));
        assert_eq!(slice.authorized_total, Some(0));
    }
}
