//! Adapter over the third-party paged REST collection.
//!
//! Listing is open to every signed-in user. Mutations require an elevated
//! role and are refused before any request is sent.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::app::{PostdeckError, Result};
use crate::domain::post::validate_fields;
use crate::domain::{
    format_timestamp, normalize_search, parse_timestamp, require_elevated, CurrentUser, Post,
    PostDraft, SortField, SortOrder, DEFAULT_AUTHOR,
};

pub use http::HttpRestClient;

pub const DEFAULT_COUNT_PAGE_SIZE: usize = 100;
pub const DEFAULT_MAX_COUNT_PAGES: u32 = 50;

/// Wire shape of an external post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPostDto {
    #[serde(
        default,
        deserialize_with = "id_from_string_or_number",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "author", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected id value: {}",
            other
        ))),
    }
}

impl ExternalPostDto {
    pub fn into_post(self) -> Post {
        let author_name = self
            .author_name
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
        let created_at = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Post {
            id: self.id,
            title: self.title,
            content: self.content,
            user_id: None,
            author_name,
            created_at,
            is_external: true,
        }
    }

    pub fn from_post(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author_name: Some(post.author_name.clone()),
            created_at: Some(format_timestamp(&post.created_at)),
        }
    }
}

/// Query parameters of one collection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u32,
    pub limit: usize,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub search: Option<String>,
}

impl PageQuery {
    /// Server field name for `sort_by`.
    pub fn sort_field(&self) -> &'static str {
        match self.sort_by {
            SortField::Date => "createdAt",
            SortField::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestPage {
    pub items: Vec<ExternalPostDto>,
    /// Collection total from the response headers, when the server sends it.
    pub total: Option<u64>,
}

#[async_trait]
pub trait RestClient: Send + Sync {
    /// `None` when the server reports no matching resource.
    async fn list(&self, query: &PageQuery) -> Result<Option<RestPage>>;
    async fn create(&self, post: &ExternalPostDto) -> Result<ExternalPostDto>;
    async fn update(&self, id: &str, post: &ExternalPostDto) -> Result<ExternalPostDto>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalPage {
    pub items: Vec<Post>,
    pub total: Option<u64>,
    pub has_more: bool,
}

pub struct ExternalPostStore {
    client: Arc<dyn RestClient>,
    count_page_size: usize,
    max_count_pages: u32,
}

impl ExternalPostStore {
    pub fn new(client: Arc<dyn RestClient>) -> Self {
        Self {
            client,
            count_page_size: DEFAULT_COUNT_PAGE_SIZE,
            max_count_pages: DEFAULT_MAX_COUNT_PAGES,
        }
    }

    pub fn with_count_limits(mut self, page_size: usize, max_pages: u32) -> Self {
        self.count_page_size = page_size.max(1);
        self.max_count_pages = max_pages.max(1);
        self
    }

    fn query(
        page: u32,
        limit: usize,
        sort_by: SortField,
        order: SortOrder,
        search: Option<&str>,
    ) -> PageQuery {
        PageQuery {
            page: page.max(1),
            limit,
            sort_by,
            order,
            search: search.and_then(normalize_search).map(String::from),
        }
    }

    pub async fn list_page(
        &self,
        page: u32,
        page_size: usize,
        sort_by: SortField,
        sort_order: SortOrder,
        search: Option<&str>,
    ) -> Result<ExternalPage> {
        let query = Self::query(page, page_size, sort_by, sort_order, search);
        let Some(rest) = self.client.list(&query).await? else {
            debug!("No external posts for page {}", query.page);
            return Ok(ExternalPage::default());
        };

        let full = rest.items.len() >= page_size;
        let has_more = match rest.total {
            Some(total) => (query.page as u64) * (page_size as u64) < total,
            None => full,
        };

        Ok(ExternalPage {
            items: rest.items.into_iter().map(ExternalPostDto::into_post).collect(),
            total: rest.total,
            has_more,
        })
    }

    /// Collection size, read from a one-row probe when the server reports a
    /// total, otherwise summed over a bounded page walk.
    pub async fn count_total(&self, search: Option<&str>) -> Result<u64> {
        let probe = Self::query(1, 1, SortField::Date, SortOrder::Desc, search);
        match self.client.list(&probe).await? {
            None => return Ok(0),
            Some(RestPage {
                total: Some(total), ..
            }) => return Ok(total),
            Some(_) => debug!("No total header, counting by pages"),
        }

        let mut count = 0u64;
        self.walk(search, |items| count += items.len() as u64).await?;
        Ok(count)
    }

    pub async fn list_all_ids(&self, search: Option<&str>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        self.walk(search, |items| ids.extend(items.iter().map(|i| i.id.clone())))
            .await?;
        Ok(ids)
    }

    async fn walk<F>(&self, search: Option<&str>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[ExternalPostDto]),
    {
        for page in 1..=self.max_count_pages {
            let query = Self::query(
                page,
                self.count_page_size,
                SortField::Date,
                SortOrder::Desc,
                search,
            );
            let Some(rest) = self.client.list(&query).await? else {
                break;
            };
            visit(&rest.items);
            if rest.items.len() < self.count_page_size {
                return Ok(());
            }
        }
        debug!("External walk stopped at the {} page cap", self.max_count_pages);
        Ok(())
    }

    pub async fn create(&self, user: Option<&CurrentUser>, draft: &PostDraft) -> Result<Post> {
        let user = require_elevated(user)?;
        draft.validate()?;

        let dto = ExternalPostDto {
            id: String::new(),
            title: draft.title.trim().to_string(),
            content: draft.content.trim().to_string(),
            author_name: Some(user.display_name.clone()),
            created_at: Some(format_timestamp(&Utc::now())),
        };
        Ok(self.client.create(&dto).await?.into_post())
    }

    pub async fn update(&self, user: Option<&CurrentUser>, post: &Post) -> Result<Post> {
        require_elevated(user)?;
        if !post.is_external {
            return Err(PostdeckError::CrossSourceEdit(post.id.clone()));
        }
        validate_fields(&post.title, &post.content)?;

        let saved = self
            .client
            .update(&post.id, &ExternalPostDto::from_post(post))
            .await?
            .into_post();
        // Keep the original creation instant when the server echoes none.
        Ok(Post {
            created_at: post.created_at,
            ..saved
        })
    }

    pub async fn delete_one(&self, user: Option<&CurrentUser>, id: &str) -> Result<()> {
        require_elevated(user)?;
        self.client.delete(id).await
    }

    /// Delete each id independently.
    pub async fn delete_many(
        &self,
        user: Option<&CurrentUser>,
        ids: &[String],
    ) -> Result<Vec<(String, Result<()>)>> {
        require_elevated(user)?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push((id.clone(), self.client.delete(id).await));
        }
        Ok(results)
    }
}
