//! Adapter over the internal document database.
//!
//! Listings are forward-cursor range queries. Owner filtering combined with
//! title ordering needs a composite index the database may not have; when
//! the query is rejected the adapter re-issues it ordered by creation time
//! and sorts the returned page by title locally. Page boundaries are then
//! drawn by date and the next-page cursor is a date cursor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::app::{PostdeckError, Result};
use crate::cache::{keys, Cache};
use crate::domain::{normalize_search, Cursor, Post, Scope, SortField, SortOrder};
use crate::store::{DocumentFilter, DocumentQuery, DocumentStore};

pub const DEFAULT_FALLBACK_SCAN_BATCHES: usize = 20;

/// Page size used when walking id-only projections.
const ID_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub scope: Scope,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub cursor: Option<Cursor>,
    pub page_size: usize,
    pub owner_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub items: Vec<Post>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

pub struct RemotePostStore {
    store: Arc<dyn DocumentStore>,
    cache: Cache,
    fallback_scan_batches: usize,
}

impl RemotePostStore {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Cache) -> Self {
        Self {
            store,
            cache,
            fallback_scan_batches: DEFAULT_FALLBACK_SCAN_BATCHES,
        }
    }

    pub fn with_fallback_scan_batches(mut self, batches: usize) -> Self {
        self.fallback_scan_batches = batches.max(1);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.store.max_batch_size()
    }

    fn filter_for(
        scope: Scope,
        owner_id: Option<&str>,
        search: Option<&str>,
    ) -> Result<DocumentFilter> {
        let owner = match scope {
            Scope::Created => Some(
                owner_id
                    .ok_or_else(|| PostdeckError::Unauthorized("sign in required".into()))?
                    .to_string(),
            ),
            Scope::All => owner_id.map(String::from),
            Scope::External => {
                return Err(PostdeckError::InvalidQuery(
                    "external posts are not stored in the document database".into(),
                ))
            }
        };
        Ok(DocumentFilter {
            owner,
            title_prefix: search.and_then(normalize_search).map(String::from),
        })
    }

    fn cache_key(request: &ListRequest) -> Result<String> {
        let raw = serde_json::to_string(request)?;
        let digest = hex::encode(Sha256::digest(raw.as_bytes()));
        Ok(format!("{}_{}", keys::POSTS, &digest[..16]))
    }

    /// One page of internal posts.
    ///
    /// A search term turns the query into a title prefix range ordered by
    /// title, whatever `sort_by` says.
    pub async fn list_page(&self, request: &ListRequest) -> Result<PostPage> {
        let key = Self::cache_key(request)?;
        if let Some(page) = self.cache.get::<PostPage>(&key, false) {
            debug!("Cache hit for {}", key);
            return Ok(page);
        }

        let page = self.fetch_page(request).await?;
        self.cache.set(&key, &page);
        Ok(page)
    }

    async fn fetch_page(&self, request: &ListRequest) -> Result<PostPage> {
        let filter = Self::filter_for(
            request.scope,
            request.owner_id.as_deref(),
            request.search.as_deref(),
        )?;
        let order_by = if filter.title_prefix.is_some() {
            SortField::Title
        } else {
            request.sort_by
        };

        // A date cursor under a title ordering can only come from an earlier
        // fallback page, so the walk stays on the fallback.
        if let Some(cursor) = &request.cursor {
            if cursor.field != order_by {
                if filter.owner.is_some() && cursor.field == SortField::Date {
                    return self.fallback_page(filter, request).await;
                }
                return Err(PostdeckError::InvalidQuery(format!(
                    "cursor on {} cannot continue an ordering by {}",
                    cursor.field, order_by
                )));
            }
        }

        let query = DocumentQuery {
            filter: filter.clone(),
            order_by,
            direction: request.sort_order,
            start_after: request.cursor.clone(),
            limit: request.page_size + 1,
        };

        match self.store.query(&query).await {
            Ok(rows) => Ok(Self::split_page(rows, request.page_size, order_by)),
            Err(e) if e.is_index_required() && filter.owner.is_some() => {
                debug!("Query rejected ({}), falling back to date ordering", e);
                self.fallback_page(filter, request).await
            }
            Err(e) => Err(e),
        }
    }

    fn split_page(mut rows: Vec<Post>, page_size: usize, field: SortField) -> PostPage {
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);
        let next_cursor = if has_more {
            rows.last().map(|p| p.cursor(field))
        } else {
            None
        };
        PostPage {
            items: rows,
            next_cursor,
            has_more,
        }
    }

    fn sort_by_title(items: &mut [Post], order: SortOrder) {
        items.sort_by(|a, b| {
            let ord = a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id));
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
    }

    /// Owner filter ordered by creation time, re-sorted by title locally. A
    /// title prefix is applied client-side while scanning forward.
    async fn fallback_page(
        &self,
        filter: DocumentFilter,
        request: &ListRequest,
    ) -> Result<PostPage> {
        let date_filter = DocumentFilter {
            owner: filter.owner.clone(),
            title_prefix: None,
        };
        let limit = request.page_size + 1;
        let mut cursor = request.cursor.clone();

        if filter.title_prefix.is_none() {
            let query = DocumentQuery {
                filter: date_filter,
                order_by: SortField::Date,
                direction: request.sort_order,
                start_after: cursor,
                limit,
            };
            let rows = self.store.query(&query).await?;
            let mut page = Self::split_page(rows, request.page_size, SortField::Date);
            Self::sort_by_title(&mut page.items, request.sort_order);
            return Ok(page);
        }

        let mut matched = Vec::new();
        let mut has_more = false;
        let mut last_scanned: Option<Cursor> = None;

        'scan: for batch in 0..self.fallback_scan_batches {
            let query = DocumentQuery {
                filter: date_filter.clone(),
                order_by: SortField::Date,
                direction: request.sort_order,
                start_after: cursor.clone(),
                limit,
            };
            let rows = self.store.query(&query).await?;
            let exhausted = rows.len() < limit;

            for post in rows {
                if filter.matches(&post) {
                    if matched.len() == request.page_size {
                        has_more = true;
                        break 'scan;
                    }
                    last_scanned = Some(post.cursor(SortField::Date));
                    matched.push(post);
                } else {
                    last_scanned = Some(post.cursor(SortField::Date));
                }
            }

            if exhausted {
                break;
            }
            cursor = last_scanned.clone();
            if batch + 1 == self.fallback_scan_batches {
                debug!("Prefix scan stopped after {} batches", self.fallback_scan_batches);
                has_more = true;
            }
        }

        Self::sort_by_title(&mut matched, request.sort_order);
        Ok(PostPage {
            items: matched,
            next_cursor: if has_more { last_scanned } else { None },
            has_more,
        })
    }

    /// Server-side count with the same predicate as [`list_page`](Self::list_page).
    pub async fn count_matching(
        &self,
        scope: Scope,
        owner_id: Option<&str>,
        search: Option<&str>,
    ) -> Result<u64> {
        let filter = Self::filter_for(scope, owner_id, search)?;
        self.store.count(&filter).await
    }

    /// Every matching id, fetched through paged id-only queries.
    pub async fn list_ids(
        &self,
        scope: Scope,
        owner_id: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<String>> {
        let filter = Self::filter_for(scope, owner_id, search)?;

        if filter.title_prefix.is_some() {
            match self.walk_ids(filter.clone(), SortField::Title, None).await {
                Err(e) if e.is_index_required() => {
                    debug!("Id query rejected ({}), scanning by date", e);
                }
                other => return other,
            }
            let date_filter = DocumentFilter {
                owner: filter.owner.clone(),
                title_prefix: None,
            };
            return self
                .walk_ids(date_filter, SortField::Date, filter.prefix_bounds())
                .await;
        }

        self.walk_ids(filter, SortField::Date, None).await
    }

    async fn walk_ids(
        &self,
        filter: DocumentFilter,
        order_by: SortField,
        title_bounds: Option<(String, String)>,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut cursor = None;

        loop {
            let query = DocumentQuery {
                filter: filter.clone(),
                order_by,
                direction: SortOrder::Asc,
                start_after: cursor,
                limit: ID_PAGE_SIZE,
            };
            let keys = self.store.query_keys(&query).await?;
            let done = keys.len() < ID_PAGE_SIZE;
            cursor = keys.last().map(|k| k.cursor(order_by));

            ids.extend(
                keys.into_iter()
                    .filter(|k| match &title_bounds {
                        Some((low, high)) => &k.title >= low && &k.title < high,
                        None => true,
                    })
                    .map(|k| k.id),
            );

            if done {
                return Ok(ids);
            }
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Post> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PostdeckError::PostNotFound(id.to_string()))
    }

    /// Write `post` under its own id, replacing any existing document.
    pub async fn upsert(&self, post: &Post) -> Result<()> {
        if post.is_external {
            return Err(PostdeckError::CrossSourceEdit(post.id.clone()));
        }
        crate::domain::post::validate_fields(&post.title, &post.content)?;
        self.store.set(post).await?;
        self.invalidate();
        Ok(())
    }

    /// Delete `ids` in one atomic batch.
    pub async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        let result = self.store.delete_batch(ids).await;
        self.invalidate();
        result
    }

    /// Delete each id on its own; one failure does not stop the rest.
    pub async fn delete_many(&self, ids: &[String]) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.store.delete_batch(std::slice::from_ref(id)).await;
            results.push((id.clone(), result));
        }
        self.invalidate();
        results
    }

    fn invalidate(&self) {
        self.cache.clear_prefix(keys::POSTS);
    }
}
