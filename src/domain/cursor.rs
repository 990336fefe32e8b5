use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::SortField;

/// Position after which the next page begins: the sort-key value of the
/// last row on the previous page, with the document id breaking ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub field: SortField,
    pub key: String,
    pub id: String,
}

impl Cursor {
    pub fn new(field: SortField, key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            field,
            key: key.into(),
            id: id.into(),
        }
    }
}

/// Forward-only page cursors for one listing configuration.
///
/// `start_of(p)` is the cursor a fetch of page `p` starts after. Page 1
/// always starts at the beginning; page `p + 1` is only known once page `p`
/// has been fetched and reported more rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorMap {
    starts: BTreeMap<u32, Cursor>,
    has_more: bool,
}

impl CursorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.starts.clear();
        self.has_more = false;
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// `Some(None)` for page 1, `Some(Some(c))` for a known page, `None` when
    /// the page has not been reached yet.
    pub fn start_of(&self, page: u32) -> Option<Option<&Cursor>> {
        if page <= 1 {
            return Some(None);
        }
        self.starts.get(&page).map(Some)
    }

    /// Closest reachable page at or before `page`, with its start cursor.
    pub fn nearest_start(&self, page: u32) -> (u32, Option<Cursor>) {
        if page < 2 {
            return (1, None);
        }
        match self.starts.range(2..=page).next_back() {
            Some((p, cursor)) => (*p, Some(cursor.clone())),
            None => (1, None),
        }
    }

    /// Record the outcome of fetching `page`: when more rows follow, the
    /// page's last cursor becomes the start of `page + 1`.
    pub fn record(&mut self, page: u32, next: Option<Cursor>, has_more: bool) {
        match (has_more, next) {
            (true, Some(cursor)) => {
                self.starts.insert(page + 1, cursor);
            }
            _ => {
                self.starts.remove(&(page + 1));
            }
        }
        self.has_more = has_more;
    }

    pub fn known_pages(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(1).chain(self.starts.keys().copied())
    }
}
