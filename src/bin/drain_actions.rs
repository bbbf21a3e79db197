use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use flairbot::reddit::RedditClient;
use flairbot::{actions, config, db};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Process all pending queued actions and exit when complete"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit once only failed actions in backoff remain
    #[arg(long)]
    skip_failed: bool,

    /// Attempts before an action counts as permanently failed (default: 5)
    #[arg(long, default_value = "5")]
    max_failed_attempts: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/flairbot.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let reddit = RedditClient::from_config(&cfg);

    let remaining = db::count_remaining_actions(&pool).await?;
    info!(remaining_actions = remaining, "Initial queue state");
    if remaining == 0 {
        info!("No queued actions to process, exiting");
        return Ok(());
    }

    let mut processed_count = 0;

    loop {
        if db::next_due_action(&pool).await?.is_some() {
            match actions::process_next_action(&pool, &reddit, &cfg).await {
                Ok(processed) => {
                    if processed {
                        processed_count += 1;
                        if processed_count % 10 == 0 {
                            let remaining = db::count_remaining_actions(&pool).await?;
                            info!(
                                processed = processed_count,
                                remaining = remaining,
                                "Drain progress"
                            );
                        }
                    } else {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
                Err(err) => {
                    error!(?err, "Error processing queued action");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        } else {
            let remaining = db::count_remaining_actions(&pool).await?;
            if remaining == 0 {
                info!(
                    total_processed = processed_count,
                    "All queued actions processed"
                );
                break;
            }

            // Everything left is in backoff.
            let pending: Vec<(i64, i32, String)> =
                sqlx::query_as("SELECT id, attempt, due_at FROM actions")
                    .fetch_all(&pool)
                    .await?;
            let max_attempts = pending
                .iter()
                .map(|(_, attempt, _)| *attempt)
                .max()
                .unwrap_or(0);
            let next_due = pending
                .iter()
                .map(|(_, _, due_at)| due_at.as_str())
                .min()
                .unwrap_or("unknown");
            warn!(
                remaining = remaining,
                max_attempts = max_attempts,
                next_due_at = %next_due,
                "No due actions but {} remain; all are in backoff.",
                remaining
            );

            if max_attempts >= args.max_failed_attempts {
                error!(
                    max_attempts = max_attempts,
                    threshold = args.max_failed_attempts,
                    "Actions have exceeded maximum failure attempts, exiting to prevent infinite retries"
                );
                break;
            }
            if args.skip_failed {
                warn!("--skip-failed specified, exiting with failed actions remaining");
                break;
            }
            warn!(
                "Waiting for backoff to expire. Use --skip-failed to exit immediately, or actions will be abandoned after {} attempts.",
                args.max_failed_attempts
            );
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        }
    }

    info!("Action drain completed");
    Ok(())
}
