pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Role, Scope, SortField, SortOrder};

#[derive(Parser)]
#[command(name = "postdeck")]
#[command(about = "Browse, page and bulk-delete posts from two sources", long_about = None)]
pub struct Cli {
    /// Act as this user instead of the configured one
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    /// Role of the acting user (Admin or User)
    #[arg(long, global = true)]
    pub role: Option<Role>,

    /// Path of the posts database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Listing overrides. Anything given here is saved to the preferences.
#[derive(Args, Debug, Clone, Default)]
pub struct ListingArgs {
    /// Which posts to list: created, all or external
    #[arg(long)]
    pub scope: Option<Scope>,

    /// Sort field: date or title
    #[arg(long)]
    pub sort: Option<SortField>,

    /// Sort direction: asc or desc
    #[arg(long)]
    pub order: Option<SortOrder>,

    /// Title prefix to search for (empty string clears it)
    #[arg(long)]
    pub search: Option<String>,

    /// Page number, starting at 1
    #[arg(long)]
    pub page: Option<u32>,

    /// Posts per page: 5, 10, 25 or 50
    #[arg(long)]
    pub per_page: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List one page of posts
    List {
        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Show a single internal post
    Show {
        id: String,
    },
    /// Create a post
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// Create it in the external source (admins only)
        #[arg(long)]
        external: bool,
    },
    /// Replace the title and content of a post
    Edit {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// The post lives in the external source
        #[arg(long)]
        external: bool,
    },
    /// Delete posts by id, or every post you may delete in a scope
    Delete {
        ids: Vec<String>,
        /// Delete everything selectable in the listing instead of given ids
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Count posts matching the listing
    Count {
        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Show how many posts select-all would pick up
    SelectAll {
        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Show or change saved preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Manage the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum PrefsAction {
    /// Print the saved preferences
    Show,
    /// Set the theme (light or dark)
    Theme { theme: crate::preferences::Theme },
    /// Forget saved preferences
    Reset,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Drop every cached entry
    Clear,
}
