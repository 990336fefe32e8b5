use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use postdeck::app::AppContext;
use postdeck::cli::{commands, CacheAction, Cli, Commands, PrefsAction};
use postdeck::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let mut user = config.user.to_user();
    if let Some(id) = cli.user_id {
        user.id = id;
    }
    if let Some(role) = cli.role {
        user.role = role;
    }

    let ctx = AppContext::new(config, cli.db)?;

    let prefs = match ctx.preferences.sync(&user.id).await {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("Using local preferences, sync failed: {}", e);
            ctx.preferences.load_local()
        }
    };
    let engine = ctx.engine(Some(user), prefs);

    match cli.command {
        Commands::List { listing } => {
            commands::list_posts(&engine, &listing).await?;
        }
        Commands::Show { id } => {
            commands::show_post(&ctx, &id).await?;
        }
        Commands::Add {
            title,
            content,
            external,
        } => {
            commands::add_post(&engine, &title, &content, external).await?;
        }
        Commands::Edit {
            id,
            title,
            content,
            external,
        } => {
            commands::edit_post(&engine, &id, &title, &content, external).await?;
        }
        Commands::Delete { ids, all, listing } => {
            commands::delete_posts(&engine, ids, all, &listing).await?;
        }
        Commands::Count { listing } => {
            commands::count_posts(&engine, &listing).await?;
        }
        Commands::SelectAll { listing } => {
            commands::select_all(&engine, &listing).await?;
        }
        Commands::Prefs { action } => match action {
            PrefsAction::Show => commands::show_preferences(&engine)?,
            PrefsAction::Theme { theme } => commands::set_theme(&engine, theme).await?,
            PrefsAction::Reset => {
                commands::reset_preferences(&ctx);
                return Ok(());
            }
        },
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                commands::clear_cache(&ctx);
                return Ok(());
            }
        },
    }

    engine.sync_preferences().await;

    Ok(())
}
