use std::future::Future;

use crate::app::{AppContext, Result};
use crate::bulk::DeleteOutcome;
use crate::cli::ListingArgs;
use crate::domain::{format_timestamp, Post, PostDraft, Scope};
use crate::engine::PostEngine;
use crate::preferences::Theme;

/// Fold command-line overrides into the saved preferences.
pub fn apply_listing(engine: &PostEngine, listing: &ListingArgs) -> Result<()> {
    let mut prefs = engine.preferences();
    let before = prefs.clone();

    if let Some(scope) = listing.scope {
        if scope != prefs.filters.option {
            prefs.pagination.current_page = 1;
        }
        prefs.filters.option = scope;
    }
    if let Some(sort) = listing.sort {
        prefs.filters.sort_by = sort;
    }
    if let Some(order) = listing.order {
        prefs.filters.sort_order = order;
    }
    if let Some(search) = &listing.search {
        prefs.filters.search = search.clone();
        prefs.pagination.current_page = 1;
    }
    if let Some(size) = listing.per_page {
        prefs.pagination.items_per_page = size;
        prefs.pagination.current_page = 1;
    }
    if let Some(page) = listing.page {
        prefs.pagination.current_page = page;
    }

    if prefs != before {
        engine.replace_preferences(prefs)?;
    }
    Ok(())
}

pub async fn list_posts(engine: &PostEngine, listing: &ListingArgs) -> Result<()> {
    apply_listing(engine, listing)?;
    engine.refresh().await?;

    let prefs = engine.preferences();
    let posts = engine.get_visible_page();

    if posts.is_empty() {
        println!("No posts");
    }
    for post in &posts {
        print_post_line(post);
    }

    let status = engine.get_fetch_status();
    let per_page = prefs.pagination.items_per_page as u64;
    match engine.get_total_for_scope() {
        Some(total) => {
            let pages = total.div_ceil(per_page).max(1);
            println!(
                "\n{} page {} of {} ({} posts)",
                prefs.filters.option, status.page, pages, total
            );
        }
        None => println!("\n{} page {}", prefs.filters.option, status.page),
    }
    if status.has_more {
        println!("More posts on page {}", status.page + 1);
    }

    Ok(())
}

pub async fn show_post(ctx: &AppContext, id: &str) -> Result<()> {
    let post = ctx.remote.get_by_id(id).await?;

    println!("{}", post.title);
    println!("by {} on {}", post.author_name, format_timestamp(&post.created_at));
    println!("id: {}\n", post.id);
    println!("{}", post.content);
    Ok(())
}

pub async fn add_post(engine: &PostEngine, title: &str, content: &str, external: bool) -> Result<()> {
    let post = engine
        .create_post(PostDraft::new(title, content), external)
        .await?;
    println!("Created post {}: {}", post.id, post.title);
    Ok(())
}

/// External posts are looked up on the current listing page, which is
/// fetched first.
pub async fn edit_post(
    engine: &PostEngine,
    id: &str,
    title: &str,
    content: &str,
    external: bool,
) -> Result<()> {
    if external {
        engine.refresh().await?;
    }
    let post = engine
        .update_post(id, external, PostDraft::new(title, content))
        .await?;
    println!("Updated post {}: {}", post.id, post.title);
    Ok(())
}

pub async fn delete_posts(
    engine: &PostEngine,
    ids: Vec<String>,
    all: bool,
    listing: &ListingArgs,
) -> Result<()> {
    apply_listing(engine, listing)?;
    engine.refresh().await?;
    let external = engine.preferences().filters.option == Scope::External;

    let outcome = if all {
        let count = engine.select_all().await?;
        if count == 0 {
            println!("Nothing to delete");
            return Ok(());
        }
        println!("Deleting {} posts...", count);
        with_progress(engine, engine.delete_selected()).await?
    } else if ids.len() == 1 {
        with_progress(engine, engine.delete_one(&ids[0])).await?
    } else {
        with_progress(engine, engine.delete_ids(ids, external)).await?
    };

    print_outcome(&outcome);
    Ok(())
}

/// Drive a delete while reporting progress. Ctrl-C asks the job to stop
/// after the batch in flight.
async fn with_progress<F>(engine: &PostEngine, job: F) -> Result<DeleteOutcome>
where
    F: Future<Output = Result<DeleteOutcome>>,
{
    let mut rx = engine.subscribe();
    let mut last_processed = 0;
    let mut cancelling = false;
    tokio::pin!(job);

    loop {
        tokio::select! {
            result = &mut job => return result,
            changed = rx.changed() => {
                if changed.is_err() {
                    return (&mut job).await;
                }
                let progress = rx.borrow_and_update().progress.clone();
                if let Some(p) = progress.filter(|p| p.running && p.processed > last_processed) {
                    last_processed = p.processed;
                    println!("  {}/{} ({}%)", p.processed, p.total, p.percent());
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                println!("Cancelling after the current batch...");
                engine.cancel_bulk_delete();
            }
        }
    }
}

fn print_outcome(outcome: &DeleteOutcome) {
    let progress = &outcome.progress;
    println!(
        "Deleted {} of {} posts, {} failed",
        progress.succeeded, progress.total, progress.failed
    );
    for item in &progress.failed_items {
        eprintln!("  ! {} - {}", item.id, item.reason);
    }
    if outcome.cancelled {
        println!("Cancelled, {} posts not attempted", outcome.unprocessed.len());
    }
}

pub async fn count_posts(engine: &PostEngine, listing: &ListingArgs) -> Result<()> {
    apply_listing(engine, listing)?;
    engine.refresh().await?;

    let scope = engine.preferences().filters.option;
    let total = engine.get_total_for_scope().unwrap_or(0);
    let authorized = engine.get_authorized_total().unwrap_or(0);
    println!("{}: {} posts, {} you may delete", scope, total, authorized);
    Ok(())
}

pub async fn select_all(engine: &PostEngine, listing: &ListingArgs) -> Result<()> {
    apply_listing(engine, listing)?;
    engine.refresh().await?;

    let count = engine.select_all().await?;
    println!("{} posts selectable", count);
    if engine.is_all_selected() {
        println!("Selection covers the whole listing");
    } else if count > 0 {
        let authorized = engine.get_authorized_total().unwrap_or(0);
        println!("Only {} of {} posts could be listed", count, authorized);
    }
    Ok(())
}

pub fn show_preferences(engine: &PostEngine) -> Result<()> {
    let prefs = engine.preferences();
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    Ok(())
}

pub async fn set_theme(engine: &PostEngine, theme: Theme) -> Result<()> {
    let mut prefs = engine.preferences();
    prefs.theme = theme;
    engine.replace_preferences(prefs)?;
    engine.sync_preferences().await;
    println!("Theme set to {}", theme);
    Ok(())
}

pub fn reset_preferences(ctx: &AppContext) {
    ctx.preferences.reset_local();
    println!("Preferences reset");
}

pub fn clear_cache(ctx: &AppContext) {
    ctx.cache.clear_all();
    println!("Cache cleared");
}

fn print_post_line(post: &Post) {
    let date = post.created_at.format("%Y-%m-%d");
    let marker = if post.is_external { "*" } else { " " };
    println!(
        "{} {} {}  ({}, {})",
        marker, date, post.title, post.author_name, post.id
    );
}
