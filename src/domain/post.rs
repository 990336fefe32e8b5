use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::{PostdeckError, Result};
use crate::domain::{CurrentUser, Cursor, SortField};

pub const DEFAULT_AUTHOR: &str = "Anonymous";

/// Length of generated internal post ids (hex characters).
const ID_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub user_id: Option<String>,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub is_external: bool,
}

impl Post {
    pub fn new_internal(title: &str, content: &str, user_id: &str, author_name: &str) -> Self {
        let created_at = Utc::now();
        let author_name = if author_name.trim().is_empty() {
            DEFAULT_AUTHOR.to_string()
        } else {
            author_name.to_string()
        };
        Self {
            id: Self::generate_id(user_id, &created_at, title),
            title: title.to_string(),
            content: content.to_string(),
            user_id: Some(user_id.to_string()),
            author_name,
            created_at,
            is_external: false,
        }
    }

    /// Generate a document id from owner, creation instant and title.
    pub fn generate_id(user_id: &str, created_at: &DateTime<Utc>, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(created_at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
        hasher.update(title.as_bytes());
        let mut id = hex::encode(hasher.finalize());
        id.truncate(ID_LEN);
        id
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    pub fn sort_key(&self, field: SortField) -> String {
        match field {
            SortField::Date => format_timestamp(&self.created_at),
            SortField::Title => self.title.clone(),
        }
    }

    pub fn cursor(&self, field: SortField) -> Cursor {
        Cursor::new(field, self.sort_key(field), self.id.clone())
    }
}

/// Fixed-width UTC timestamp; lexicographic order equals chronological order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| s.parse::<DateTime<Utc>>().ok())
}

/// User-entered post fields, validated before any request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.title, &self.content)
    }

    pub fn into_internal(self, user: &CurrentUser) -> Result<Post> {
        self.validate()?;
        Ok(Post::new_internal(
            self.title.trim(),
            self.content.trim(),
            &user.id,
            &user.display_name,
        ))
    }
}

pub fn validate_fields(title: &str, content: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(PostdeckError::validation("title", "Title is required"));
    }
    if content.trim().is_empty() {
        return Err(PostdeckError::validation("content", "Content is required"));
    }
    Ok(())
}
