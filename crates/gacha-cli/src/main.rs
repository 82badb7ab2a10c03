use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gacha_storage::{
    connect_pg, ensure_schema, CatalogStore, HttpSessionFactory, MemoryCatalogStore,
    MemoryRunLogStore, MemorySiteConfigStore, PgCatalogStore, PgRunLogStore, PgSiteConfigStore,
    RunLogStore, SiteConfigStore,
};
use gacha_sync::{
    build_scheduler, load_site_registry, seed_site_configs, LogNotificationSink, NotificationSink,
    ScrapeRunner, SyncConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gacha-cli")]
#[command(about = "Gacha release tracker command-line interface")]
struct Cli {
    /// Use the Postgres stores behind DATABASE_URL instead of in-memory ones.
    #[arg(long)]
    postgres: bool,

    /// Site registry used to seed missing configurations.
    #[arg(long, default_value = "sites.yaml")]
    sites_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled site once, or a single site with --site.
    Run {
        #[arg(long)]
        site: Option<String>,
    },
    /// Start the cron-driven scrape and aging jobs.
    Schedule,
    /// Serve the JSON API (plus the scheduler when enabled).
    Serve,
    /// Send a test notification.
    NotifyTest {
        #[arg(long)]
        to: String,
    },
}

struct Stores {
    catalog: Arc<dyn CatalogStore>,
    site_configs: Arc<dyn SiteConfigStore>,
    run_logs: Arc<dyn RunLogStore>,
}

async fn build_stores(config: &SyncConfig, postgres: bool) -> Result<Stores> {
    if postgres {
        let pool = connect_pg(&config.database_url).await?;
        ensure_schema(&pool).await?;
        Ok(Stores {
            catalog: Arc::new(PgCatalogStore::new(pool.clone())),
            site_configs: Arc::new(PgSiteConfigStore::new(pool.clone())),
            run_logs: Arc::new(PgRunLogStore::new(pool)),
        })
    } else {
        Ok(Stores {
            catalog: Arc::new(MemoryCatalogStore::new()),
            site_configs: Arc::new(MemorySiteConfigStore::new()),
            run_logs: Arc::new(MemoryRunLogStore::new()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let stores = build_stores(&config, cli.postgres).await?;

    if cli.sites_file.exists() {
        let registry = load_site_registry(&cli.sites_file)?;
        let created = seed_site_configs(stores.site_configs.as_ref(), &registry).await?;
        if created > 0 {
            info!(created, "seeded site configurations");
        }
    }

    let sessions = Arc::new(HttpSessionFactory::new(config.fetch_config()));
    let sink: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);
    let runner = Arc::new(ScrapeRunner::new(
        stores.catalog.clone(),
        stores.site_configs.clone(),
        stores.run_logs.clone(),
        sessions,
        sink.clone(),
        &config,
    ));

    match cli.command.unwrap_or(Commands::Run { site: None }) {
        Commands::Run { site: Some(site) } => {
            let outcome = runner.run_site(&site).await?;
            println!(
                "run complete: site={site} total={} new={}",
                outcome.total_found, outcome.new_count
            );
        }
        Commands::Run { site: None } => {
            let summary = runner.run_enabled_sites().await?;
            for report in &summary.reports {
                println!(
                    "{}: {} total={} new={}",
                    report.site,
                    report.status.as_str(),
                    report.outcome.total_found,
                    report.outcome.new_count
                );
            }
            println!("batch complete: {} new item(s)", summary.new_items.len());
        }
        Commands::Schedule => {
            let sched = build_scheduler(runner, &config).await?;
            sched.start().await?;
            info!(
                scrape_cron = %config.scrape_cron,
                aging_cron = %config.aging_cron,
                "scheduler started, press ctrl-c to stop"
            );
            tokio::signal::ctrl_c().await?;
        }
        Commands::Serve => {
            if config.scheduler_enabled {
                let sched = build_scheduler(runner.clone(), &config).await?;
                sched.start().await?;
                info!("background scheduler started alongside the web surface");
            }
            let state = gacha_web::AppState {
                runner,
                catalog: stores.catalog.clone(),
            };
            gacha_web::serve(state, config.web_port).await?;
        }
        Commands::NotifyTest { to } => {
            sink.send_test(&to).await?;
            println!("test notification dispatched to {to}");
        }
    }

    Ok(())
}
