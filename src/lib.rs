//! # Postdeck
//!
//! A posts pagination and bulk-delete engine over two sources: an internal
//! document store holding posts written by signed-in users, and an external
//! REST feed of third-party posts.
//!
//! ## Architecture
//!
//! ```text
//! Store / REST → Remote / External adapters → Engine → CLI
//!                        ↑ Cache
//! ```
//!
//! - [`store`]: document store seam and its SQLite implementation
//! - [`remote`]: cursor pagination, counting and batched deletes of internal posts
//! - [`external`]: page-numbered access to the REST feed
//! - [`bulk`]: chunked, retried, cancellable deletes
//! - [`engine`]: listing state, selection and progress
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a post
//! postdeck add --title "Hello" --content "First post"
//!
//! # Second page of every internal post, ten at a time
//! postdeck list --scope all --per-page 10 --page 2
//!
//! # Delete everything you own that starts with "Draft"
//! postdeck delete --all --scope created --search Draft
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// the cache, both post adapters and preferences.
pub mod app;

/// Chunked bulk deletes with retry, backoff and cancellation.
pub mod bulk;

/// Expiring key/value cache for pages and preferences.
pub mod cache;

/// Command-line interface using clap.
///
/// - `list` - Show one page of posts
/// - `show <id>` - Show one internal post
/// - `add` / `edit` - Write posts
/// - `delete [ids] [--all]` - Bulk delete
/// - `count`, `select-all` - Totals of the current listing
/// - `prefs`, `cache` - Local state
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/postdeck/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Post`](domain::Post): a post from either source
/// - [`Cursor`](domain::Cursor): resume point of an ordered listing
/// - [`DeleteProgress`](domain::DeleteProgress): bulk delete tally
pub mod domain;

/// Listing state machine over both sources.
pub mod engine;

/// External REST feed adapter.
pub mod external;

/// Listing preferences kept locally and reconciled with the store.
pub mod preferences;

/// Internal posts adapter over a [`DocumentStore`](store::DocumentStore).
pub mod remote;

/// Document store seam and SQLite persistence.
pub mod store;
