use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::app::{PostdeckError, Result};
use crate::external::{ExternalPostDto, PageQuery, RestClient, RestPage};

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest client for a REST collection rooted at `base_url`.
pub struct HttpRestClient {
    client: Client,
    base_url: Url,
}

impl HttpRestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent("postdeck/0.1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn collection_url(&self, query: &PageQuery) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("page", &query.page.to_string())
                .append_pair("limit", &query.limit.to_string())
                .append_pair("sortBy", query.sort_field())
                .append_pair("order", query.order.as_str());
            if let Some(search) = &query.search {
                pairs.append_pair("search", search);
            }
        }
        url
    }

    fn resource_url(&self, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PostdeckError::Config(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PostdeckError::Api {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn list(&self, query: &PageQuery) -> Result<Option<RestPage>> {
        let response = self.client.get(self.collection_url(query)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;

        let total = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let items = response.json::<Vec<ExternalPostDto>>().await?;
        Ok(Some(RestPage { items, total }))
    }

    async fn create(&self, post: &ExternalPostDto) -> Result<ExternalPostDto> {
        let response = self
            .client
            .post(self.base_url.clone())
            .json(post)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update(&self, id: &str, post: &ExternalPostDto) -> Result<ExternalPostDto> {
        let response = self
            .client
            .put(self.resource_url(id)?)
            .json(post)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let response = self.client.delete(self.resource_url(id)?).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
