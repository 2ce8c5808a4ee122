mod cli;
mod export;

use anyhow::{Context, Result};
use background_service::{BackgroundService, ConfiguredNotifier, NotificationBudget, ServiceSettings};
use chrono::{Local, Utc};
use clap::Parser;
use cli::{Cli, Command, ExportArgs, LeadsArgs, MarkArgs, RunArgs};
use database::{Database, LeadQuery, LAST_POLL_SETTING};
use lead_filter::LeadFilter;
use leadwatch_core::{AppConfig, CoreError, ErrorReporter, Lead, RedditApiError};
use reddit_client::{RedditClient, RedditOAuth2Config};
use tracing_subscriber::EnvFilter;

const WORKSPACE_TARGETS: [&str; 5] = [
    "leadwatch",
    "reddit_client",
    "lead_filter",
    "database",
    "background_service",
];

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

async fn open_database(config: &AppConfig) -> Result<Database> {
    let mut database = Database::new(config.database.url.clone());
    database
        .connect()
        .await
        .with_context(|| format!("Could not open database {}", config.database.url))?;
    database.run_migrations().await?;
    Ok(database)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C"),
        Err(e) => {
            tracing::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Rejected credentials or a bad configuration stop `run` before the first
/// cycle. Anything else is left to the poll loop.
fn is_fatal_startup_error(error: &CoreError) -> bool {
    matches!(
        error,
        CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }) | CoreError::Config(_)
    )
}

async fn run(config: AppConfig, args: RunArgs) -> Result<()> {
    let oauth_config = RedditOAuth2Config::from_config(&config.reddit)?;
    let client = RedditClient::from_settings(oauth_config, &config.rate_limit)?;

    if let Err(e) = client.authenticate().await {
        if is_fatal_startup_error(&e) {
            return Err(e.into());
        }
        ErrorReporter::new().report_warning(&e);
        tracing::warn!("Reddit is unreachable, the first poll cycle will retry");
    }

    let database = open_database(&config).await?;
    let mut service = BackgroundService::new(
        client,
        ConfiguredNotifier::from_kind(config.notifications.backend),
        LeadFilter::new(config.filter.clone())?,
        database,
        NotificationBudget::from_config(&config.notifications),
        ServiceSettings::from_config(&config),
    );

    if args.once {
        service.restore_budget(Utc::now()).await?;
        let report = service.run_cycle(Utc::now()).await?;
        println!(
            "Polled {} subreddits ({} failed): {} posts, {} new, {} leads, {} notified, {} deferred",
            report.subreddits_polled,
            report.subreddit_errors,
            report.posts_fetched,
            report.new_posts,
            report.leads_found,
            report.notified,
            report.deferred
        );
    } else {
        service.run_until(shutdown_signal()).await?;
    }

    let client = service.source();
    let status = client.get_rate_limit_status().await;
    tracing::debug!(
        "Rate limiter: {:.0}% used, {} requests left this window",
        status.utilization_percentage(),
        status.requests_remaining_in_window()
    );
    tracing::debug!("Retry metrics: {:?}", client.get_retry_metrics());
    match client.export_api_metrics().await {
        Ok(json) => tracing::debug!("API metrics: {}", json),
        Err(e) => tracing::debug!("Could not export API metrics: {}", e),
    }

    service.database().close().await;
    Ok(())
}

fn print_leads(leads: &[Lead]) {
    if leads.is_empty() {
        println!("No leads stored.");
        return;
    }

    println!(
        "{:<10} {:>5} {:<10} {:<16} {:<10} TITLE",
        "ID", "SCORE", "STATUS", "SUBREDDIT", "GRADE"
    );
    for lead in leads {
        let mut title: String = lead.post.title.chars().take(60).collect();
        if lead.post.title.chars().count() > 60 {
            title.push_str("...");
        }
        println!(
            "{:<10} {:>5} {:<10} {:<16} {:<10} {}",
            lead.post.id,
            lead.priority_score,
            lead.status,
            lead.post.subreddit,
            lead.grade_level,
            title
        );
        println!("{:>43} {}", "", lead.post.link());
    }
}

async fn list_leads(config: &AppConfig, args: LeadsArgs) -> Result<()> {
    let database = open_database(config).await?;
    let leads = database
        .get_leads(&LeadQuery {
            status: args.status,
            min_score: args.min_score,
            limit: Some(args.limit),
        })
        .await?;
    print_leads(&leads);
    database.close().await;
    Ok(())
}

async fn mark_lead(config: &AppConfig, args: MarkArgs) -> Result<()> {
    let database = open_database(config).await?;
    database
        .update_lead_status(&args.post_id, args.status, args.notes.as_deref())
        .await?;
    println!("{} -> {}", args.post_id, args.status);
    database.close().await;
    Ok(())
}

async fn export_leads(config: &AppConfig, args: ExportArgs) -> Result<()> {
    let database = open_database(config).await?;
    let leads = database
        .get_leads(&LeadQuery {
            status: args.status,
            ..LeadQuery::default()
        })
        .await?;
    database.close().await;

    let path = args
        .output
        .unwrap_or_else(|| export::default_export_path(Local::now()));
    export::export_to_file(&path, &leads)?;
    println!("Exported {} leads to {}", leads.len(), path.display());
    Ok(())
}

async fn show_stats(config: &AppConfig) -> Result<()> {
    let database = open_database(config).await?;
    let summary = database.lead_summary().await?;
    let last_poll = database.get_setting(LAST_POLL_SETTING).await?;
    database.close().await;

    println!("Total leads:          {}", summary.total_leads);
    println!("Average priority:     {:.1}/10", summary.average_priority);
    println!("High priority (8-10): {}", summary.high_priority);
    println!("Urgent posts:         {}", summary.urgent);
    println!("Parent posts:         {}", summary.parent);
    println!("Posts seen:           {}", summary.seen_posts);
    println!(
        "Last poll:            {}",
        last_poll.as_deref().unwrap_or("never")
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; the environment may already be set
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            ErrorReporter::new().report_error(&e);
            return Err(e.into());
        }
    };

    let result = match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Leads(args) => list_leads(&config, args).await,
        Command::Mark(args) => mark_lead(&config, args).await,
        Command::Export(args) => export_leads(&config, args).await,
        Command::Stats => show_stats(&config).await,
    };

    if let Err(e) = &result {
        if let Some(core) = e.downcast_ref::<CoreError>() {
            ErrorReporter::new().report_error(core);
        }
    }
    result
}
