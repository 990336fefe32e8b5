pub mod cursor;
pub mod filters;
pub mod post;
pub mod progress;
pub mod user;

pub use cursor::{Cursor, CursorMap};
pub use filters::{
    normalize_search, validate_page, validate_page_size, Filters, ListingKey, Pagination, Scope,
    SortField, SortOrder, ALLOWED_PAGE_SIZES, DEFAULT_PAGE_SIZE,
};
pub use post::{format_timestamp, parse_timestamp, Post, PostDraft, DEFAULT_AUTHOR};
pub use progress::{DeleteProgress, FailedItem};
pub use user::{require_elevated, require_user, CurrentUser, Role};
