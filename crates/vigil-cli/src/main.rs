use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vigil_client::ReqwestFetcher;
use vigil_core::SelectorDetector;
use vigil_core::extract::{ExtractionEngine, extract_records};
use vigil_core::models::{SelectorConfig, SelectorMode, Target, TargetStatus};
use vigil_core::monitor::{
    MonitorConfig, MonitorScheduler, MonitorService, TracingMonitorReporter,
    dispatch_notifications,
};
use vigil_core::throttle::{ThrottleConfig, ThrottledFetcher};
use vigil_core::traits::{Fetcher, LogSink, TargetStore};
use vigil_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Job-posting monitor for career pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor scheduler until interrupted
    Run {
        /// Maximum number of concurrently monitored targets
        #[arg(long, env = "VIGIL_MAX_TASKS", default_value_t = 50)]
        max_tasks: usize,
    },

    /// Register a career page for monitoring
    Add {
        /// Career page URL
        #[arg(short, long)]
        url: String,

        /// Owner the notifications are addressed to
        #[arg(short, long, env = "VIGIL_OWNER")]
        owner: String,

        /// Poll interval in seconds (minimum 60)
        #[arg(short, long, default_value_t = 1800)]
        interval: u64,

        /// Container selector; supplying one switches the target to custom
        /// selector mode (auto-detection is skipped)
        #[arg(long)]
        container: Option<String>,

        /// Title selector inside a container
        #[arg(long)]
        title: Option<String>,

        /// Link selector inside a container
        #[arg(long)]
        link: Option<String>,

        /// Location selector inside a container
        #[arg(long)]
        location: Option<String>,

        /// Employer selector inside a container
        #[arg(long)]
        employer: Option<String>,

        /// Always use the rendered (headless browser) strategy
        #[arg(long, default_value_t = false)]
        browser: bool,
    },

    /// List monitored targets
    List {
        /// Show only this owner's targets (defaults to all active)
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Pause monitoring for a target
    Pause {
        /// Target id
        id: String,
    },

    /// Resume monitoring for a paused or errored target
    Resume {
        /// Target id
        id: String,
    },

    /// Remove a target and its job history
    Remove {
        /// Target id
        id: String,
    },

    /// Fetch a page once and print the selectors detection would use
    Detect {
        /// Career page URL
        #[arg(short, long)]
        url: String,
    },

    /// Show recently discovered postings for a target
    History {
        /// Target id
        id: String,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { max_tasks } => {
            let db = connect_db().await?;
            cmd_run(db, max_tasks).await?;
        }
        Commands::Add {
            url,
            owner,
            interval,
            container,
            title,
            link,
            location,
            employer,
            browser,
        } => {
            let db = connect_db().await?;
            let selectors = SelectorConfig {
                mode: if container.is_some() {
                    SelectorMode::Custom
                } else {
                    SelectorMode::Auto
                },
                container,
                title,
                link,
                location,
                employer,
                use_browser: browser,
            };
            cmd_add(&db, url, owner, interval, selectors).await?;
        }
        Commands::List { owner } => {
            let db = connect_db().await?;
            cmd_list(&db, owner.as_deref()).await?;
        }
        Commands::Pause { id } => {
            let db = connect_db().await?;
            cmd_set_status(&db, &id, TargetStatus::Paused).await?;
        }
        Commands::Resume { id } => {
            let db = connect_db().await?;
            cmd_set_status(&db, &id, TargetStatus::Active).await?;
        }
        Commands::Remove { id } => {
            let db = connect_db().await?;
            cmd_remove(&db, &id).await?;
        }
        Commands::Detect { url } => {
            cmd_detect(&url).await?;
        }
        Commands::History { id, limit } => {
            let db = connect_db().await?;
            cmd_history(&db, &id, limit).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid target id: {id}"))
}

fn http_fetcher() -> Result<ReqwestFetcher> {
    let fetcher = match std::env::var("VIGIL_USER_AGENT") {
        Ok(ua) => ReqwestFetcher::with_user_agent(std::time::Duration::from_secs(30), &ua),
        Err(_) => ReqwestFetcher::new(),
    };
    fetcher.map_err(|e| anyhow::anyhow!(e))
}

#[cfg(feature = "browser")]
async fn renderer() -> Result<vigil_client::BrowserRenderer> {
    vigil_client::BrowserRenderer::new()
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

#[cfg(not(feature = "browser"))]
async fn renderer() -> Result<vigil_core::traits::NullRenderer> {
    Ok(vigil_core::traits::NullRenderer)
}

async fn cmd_run(db: Database, max_tasks: usize) -> Result<()> {
    let fetcher = ThrottledFetcher::new(http_fetcher()?, ThrottleConfig::default());
    let engine = ExtractionEngine::new(fetcher, renderer().await?);

    let config = MonitorConfig {
        max_tasks,
        ..MonitorConfig::default()
    };
    let batch_size = config.notify_batch_size;

    let (tx, rx) = mpsc::channel(64);
    let dispatcher = tokio::spawn(dispatch_notifications(rx, LogSink, batch_size));

    let service = MonitorService::new(
        db.target_repo(),
        db.lock_repo(),
        db.seen_repo(),
        engine,
        tx,
        config,
    );
    let scheduler = MonitorScheduler::new(service, TracingMonitorReporter);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    scheduler.run(cancel).await;

    // Dropping the scheduler closes the notification channel; the dispatcher
    // drains what is left and exits.
    drop(scheduler);
    dispatcher.await.context("Notification dispatcher panicked")?;

    Ok(())
}

async fn cmd_add(
    db: &Database,
    url: String,
    owner: String,
    interval: u64,
    selectors: SelectorConfig,
) -> Result<()> {
    let target = Target::new(url, owner, interval).with_selectors(selectors);
    db.target_repo()
        .create(&target)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("Added target {} ({})", target.id, target.url);
    println!(
        "  owner: {}, interval: {}s, mode: {:?}",
        target.owner, target.interval_secs, target.selectors.mode
    );
    Ok(())
}

async fn cmd_list(db: &Database, owner: Option<&str>) -> Result<()> {
    let repo = db.target_repo();
    let targets = match owner {
        Some(owner) => repo.list_by_owner(owner).await,
        None => repo.list_active().await,
    }
    .map_err(|e| anyhow::anyhow!(e))?;

    if targets.is_empty() {
        println!("No targets found");
        return Ok(());
    }

    for target in &targets {
        println!(
            "{}  [{}]  {}  every {}s  found {}  errors {}",
            target.id,
            target.status,
            target.url,
            target.interval_secs,
            target.jobs_found_total,
            target.error_count,
        );
    }
    println!("\nTotal: {} targets", targets.len());
    Ok(())
}

async fn cmd_set_status(db: &Database, id: &str, status: TargetStatus) -> Result<()> {
    let id = parse_id(id)?;
    let repo = db.target_repo();
    if repo.get(id).await.map_err(|e| anyhow::anyhow!(e))?.is_none() {
        anyhow::bail!("No target with id {id}");
    }
    repo.set_status(id, status)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("Target {id} is now {status}");
    Ok(())
}

async fn cmd_remove(db: &Database, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    db.target_repo()
        .delete(id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("Removed target {id}");
    Ok(())
}

/// One-shot detection: fetch the page, print what auto-detection found, and
/// show up to 3 sample records. Touches nothing in the database.
async fn cmd_detect(url: &str) -> Result<()> {
    let fetcher = http_fetcher()?;
    let html = fetcher.fetch(url).await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("Fetched {} bytes of HTML", html.len());

    let detector = SelectorDetector::new();
    let detected = detector.detect(&html, url);
    if detected.is_empty() {
        println!("No job containers detected on {url}");
        println!("The page may need the rendered strategy, or custom selectors.");
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&detected)?);

    let selectors = SelectorConfig {
        mode: SelectorMode::Custom,
        container: detected.container,
        title: detected.title,
        link: detected.link,
        location: detected.location,
        employer: None,
        use_browser: false,
    };
    if !detector.validate(&html, &selectors) {
        println!("\nContainer selector did not match any element; no sample records.");
        return Ok(());
    }

    let probe = Target::new(url, "detect", 60).with_selectors(selectors);
    let records =
        extract_records(&html, &probe, &probe.selectors).map_err(|e| anyhow::anyhow!(e))?;

    println!("\n{} records on the page. Sample:", records.len());
    for record in records.iter().take(3) {
        println!(
            "  {} — {} ({})",
            record.title,
            record.employer,
            record.location.as_deref().unwrap_or("location n/a"),
        );
        println!("      {}", record.url);
    }
    Ok(())
}

async fn cmd_history(db: &Database, id: &str, limit: usize) -> Result<()> {
    let id = parse_id(id)?;
    let repo = db.target_repo();

    let target = repo
        .get(id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .with_context(|| format!("No target with id {id}"))?;

    let records = repo
        .recent_records(id, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if records.is_empty() {
        println!("No postings recorded yet for {}", target.url);
        return Ok(());
    }

    println!("Recent postings for {} ({}):\n", target.url, target.owner);
    for record in &records {
        println!(
            "  {}  {} — {} ({}, {})",
            record.first_seen.format("%Y-%m-%d %H:%M UTC"),
            record.title,
            record.employer,
            record.location.as_deref().unwrap_or("location n/a"),
            &record.fingerprint[..8],
        );
        println!("      {}", record.url);
    }
    println!("\nTotal: {} postings", records.len());
    Ok(())
}
