pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{format_timestamp, Cursor, Post, SortField, SortOrder};
use crate::preferences::Preferences;

pub use sqlite::SqliteStore;

/// Upper bound of "starts with" ranges: `[term, term + PREFIX_SENTINEL)`.
pub const PREFIX_SENTINEL: char = '\u{f8ff}';

/// Most documents one atomic batch may touch.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DocumentFilter {
    /// Equality filter on the owning user.
    pub owner: Option<String>,
    /// Prefix range on the title.
    pub title_prefix: Option<String>,
}

impl DocumentFilter {
    pub fn prefix_bounds(&self) -> Option<(String, String)> {
        self.title_prefix
            .as_ref()
            .map(|term| (term.clone(), format!("{}{}", term, PREFIX_SENTINEL)))
    }

    pub fn matches(&self, post: &Post) -> bool {
        if let Some(owner) = &self.owner {
            if !post.is_owned_by(owner) {
                return false;
            }
        }
        match self.prefix_bounds() {
            Some((low, high)) => post.title >= low && post.title < high,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentQuery {
    pub filter: DocumentFilter,
    pub order_by: SortField,
    pub direction: SortOrder,
    pub start_after: Option<Cursor>,
    pub limit: usize,
}

/// Id-only projection of a post document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKey {
    pub id: String,
    pub user_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentKey {
    pub fn cursor(&self, field: SortField) -> Cursor {
        let key = match field {
            SortField::Date => format_timestamp(&self.created_at),
            SortField::Title => self.title.clone(),
        };
        Cursor::new(field, key, self.id.clone())
    }
}

/// Client surface of the hosted document database holding internal posts.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ordered range query. A `title_prefix` requires ordering by title.
    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Post>>;
    async fn query_keys(&self, query: &DocumentQuery) -> Result<Vec<DocumentKey>>;
    /// Server-side count aggregate.
    async fn count(&self, filter: &DocumentFilter) -> Result<u64>;
    async fn get(&self, id: &str) -> Result<Option<Post>>;
    /// Overwrite the document keyed by `post.id`.
    async fn set(&self, post: &Post) -> Result<()>;
    /// Delete all `ids` in one atomic batch of at most `max_batch_size()`.
    async fn delete_batch(&self, ids: &[String]) -> Result<()>;

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_WRITES
    }
}

/// Remote copy of a user's listing preferences.
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>>;
    /// Merge-write `preferences`, returning the stored `updated_at` stamp.
    async fn save_preferences(&self, user_id: &str, preferences: &Preferences) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_bounds() {
        let filter = DocumentFilter {
            owner: None,
            title_prefix: Some("Hello".into()),
        };
        let (low, high) = filter.prefix_bounds().unwrap();
        assert_eq!(low, "Hello");
        assert_eq!(high, "Hello\u{f8ff}");
    }

    #[test]
    fn test_filter_matches() {
        let mut post = Post::new_internal("Hello world", "C", "u1", "Ann");
        post.id = "p".into();

        let by_owner = DocumentFilter {
            owner: Some("u1".into()),
            title_prefix: None,
        };
        assert!(by_owner.matches(&post));

        let other_owner = DocumentFilter {
            owner: Some("u2".into()),
            title_prefix: None,
        };
        assert!(!other_owner.matches(&post));

        let prefix = DocumentFilter {
            owner: None,
            title_prefix: Some("Hell".into()),
        };
        assert!(prefix.matches(&post));

        let miss = DocumentFilter {
            owner: None,
            title_prefix: Some("world".into()),
        };
        assert!(!miss.matches(&post));
    }
}
