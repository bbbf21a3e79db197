use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use flairbot::reddit::RedditClient;
use flairbot::{actions, config, db, monitor};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    // Spawn action worker (single-threaded)
    let worker_pool = pool.clone();
    let worker_reddit = reddit.clone();
    let worker_cfg = cfg.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    tokio::spawn(async move {
        loop {
            match actions::process_next_action(&worker_pool, &worker_reddit, &worker_cfg).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "action worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(subreddit = %cfg.reddit.subreddit, "starting flair monitor");
    monitor::run(&pool, &reddit, &cfg).await;

    Ok(())
}
