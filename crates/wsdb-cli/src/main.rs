mod audit;
mod images;
mod listings;
mod runtime;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "wsdb-cli")]
#[command(about = "Wholesale listing scraper, image cache and audit sweeps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search one marketplace and print (or store) the listing stubs
    Search {
        /// Platform id, e.g. dhgate
        platform: String,
        /// Search keywords
        query: String,
        /// Maximum number of listings to return
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Allow headless rendering for result pages, overriding `WSDB_HEADLESS_DEFAULT`
        #[arg(long, overrides_with = "no_headless")]
        headless: bool,
        /// Never render result pages headless for this search
        #[arg(long, overrides_with = "headless")]
        no_headless: bool,
        /// Insert the stubs into the listing store instead of printing them
        #[arg(long)]
        save: bool,
    },
    /// Re-fetch one stored listing's detail page
    Refresh {
        /// Listing id
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        id: Option<i64>,
        /// Listing URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Sweep stored listings and heal weak records
    Audit {
        /// Only sweep listings of this platform
        #[arg(long)]
        platform: Option<String>,
        /// Resume after this listing id
        #[arg(long)]
        from: Option<i64>,
        /// Cron expression; run the sweep on this schedule until Ctrl-C
        #[arg(long)]
        schedule: Option<String>,
        /// Run a single sweep even if `WSDB_AUDIT_SCHEDULE` is set
        #[arg(long, conflicts_with = "schedule")]
        once: bool,
    },
    /// List stored listings whose detail record is weak
    Weak {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Resolve an image URL through the local cache
    Image {
        url: String,
        /// Page URL that relative image URLs are resolved against
        #[arg(long)]
        base: Option<String>,
    },
    /// Deny-list an image hash and delete its cached file
    DenyImage { hash: String },
}

/// `None` leaves the configured default in place.
fn headless_override(headless: bool, no_headless: bool) -> Option<bool> {
    if headless {
        Some(true)
    } else if no_headless {
        Some(false)
    } else {
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let runtime = Runtime::load()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(runtime.config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Search {
            platform,
            query,
            limit,
            headless,
            no_headless,
            save,
        } => {
            let headless = headless_override(headless, no_headless);
            listings::run_search(&runtime, &platform, &query, limit, headless, save).await
        }
        Commands::Refresh { id, url } => listings::run_refresh(&runtime, id, url.as_deref()).await,
        Commands::Audit {
            platform,
            from,
            schedule,
            once,
        } => {
            let schedule = if once {
                None
            } else {
                schedule.or_else(|| runtime.config.audit_schedule.clone())
            };
            match schedule {
                Some(cron) => audit::run_scheduled(&runtime, platform, &cron).await,
                None => audit::run_once(&runtime, platform.as_deref(), from).await,
            }
        }
        Commands::Weak { platform, limit } => {
            listings::run_weak(&runtime, platform.as_deref(), limit).await
        }
        Commands::Image { url, base } => images::run_resolve(&runtime, &url, base.as_deref()).await,
        Commands::DenyImage { hash } => images::run_deny(&runtime, &hash).await,
    }
}

#[cfg(test)]
mod tests;
