use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::app::{PostdeckError, Result};

pub const ALLOWED_PAGE_SIZES: [usize; 4] = [5, 10, 25, 50];
pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Date,
    Title,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Which source and ownership filter a listing covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Internal posts owned by the current user.
    #[default]
    Created,
    /// Every internal post. External posts are never part of this view.
    All,
    /// The third-party feed.
    External,
}

impl Scope {
    pub fn is_external(self) -> bool {
        matches!(self, Scope::External)
    }
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Title => "title",
        }
    }
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Created => "created",
            Scope::All => "all",
            Scope::External => "external",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "date" => Ok(SortField::Date),
            "title" => Ok(SortField::Title),
            other => Err(PostdeckError::validation(
                "sortBy",
                format!("Invalid sort field: {}", other),
            )),
        }
    }
}

impl FromStr for SortOrder {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(PostdeckError::validation(
                "sortOrder",
                format!("Invalid sort order: {}", other),
            )),
        }
    }
}

impl FromStr for Scope {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" | "mine" => Ok(Scope::Created),
            "all" | "community" => Ok(Scope::All),
            "external" => Ok(Scope::External),
            other => Err(PostdeckError::validation(
                "option",
                format!("Invalid option: {}", other),
            )),
        }
    }
}

pub fn validate_page_size(size: usize) -> Result<usize> {
    if ALLOWED_PAGE_SIZES.contains(&size) {
        Ok(size)
    } else {
        Err(PostdeckError::validation(
            "itemsPerPage",
            format!("Items per page must be one of {:?}", ALLOWED_PAGE_SIZES),
        ))
    }
}

pub fn validate_page(page: u32) -> Result<u32> {
    if page == 0 {
        return Err(PostdeckError::validation("currentPage", "Pages start at 1"));
    }
    Ok(page)
}

/// Trimmed search term, `None` when blank.
pub fn normalize_search(search: &str) -> Option<&str> {
    let term = search.trim();
    (!term.is_empty()).then_some(term)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Filters {
    pub search: String,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub option: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub items_per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current_page: 1,
            items_per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Everything that shapes a listing apart from the page number. Cursors
/// computed under one key are meaningless under another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub scope: Scope,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub search: Option<String>,
    pub page_size: usize,
}

impl ListingKey {
    pub fn new(filters: &Filters, pagination: &Pagination) -> Self {
        Self {
            scope: filters.option,
            sort_by: filters.sort_by,
            sort_order: filters.sort_order,
            search: normalize_search(&filters.search).map(String::from),
            page_size: pagination.items_per_page,
        }
    }
}
