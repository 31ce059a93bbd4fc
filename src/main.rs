use relive::config::Config;
use relive::models::ScheduledBroadcast;
use relive::{BroadcastOutcome, BroadcastPipeline};
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting relive archive downloader");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });

    let mut broadcasts = match load_broadcasts(&config.broadcasts_file).await {
        Ok(b) => b,
        Err(e) => {
            error!(
                "Failed to load broadcasts from {}: {}",
                config.broadcasts_file.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let pipeline = match BroadcastPipeline::from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to set up pipeline: {}", e);
            std::process::exit(1);
        }
    };

    broadcasts.sort_by_key(|b| b.event.start);
    info!("{} broadcasts scheduled", broadcasts.len());

    let mut failed = 0usize;
    for broadcast in &broadcasts {
        match pipeline.run(broadcast).await {
            BroadcastOutcome::Success(path) => info!("Finished {}", path.display()),
            BroadcastOutcome::AlreadyComplete(path) => {
                info!("Skipped {}, already complete", path.display())
            }
            BroadcastOutcome::Unavailable => info!(
                "{} / {} at {} not in the archive yet",
                broadcast.info.station, broadcast.info.show, broadcast.event.start
            ),
            BroadcastOutcome::Failed(reason) => {
                failed += 1;
                warn!(
                    "{} / {} at {} failed: {}",
                    broadcast.info.station, broadcast.info.show, broadcast.event.start, reason
                );
            }
        }
    }

    info!(
        "Processed {} broadcasts ({} failed)",
        broadcasts.len(),
        failed
    );
}

async fn load_broadcasts(path: &Path) -> relive::Result<Vec<ScheduledBroadcast>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}
