use bloomguard::config::settings;
use bloomguard::logging;
use bloomguard::services::metrics;
use bloomguard::services::storage::RedisBitStore;
use bloomguard::DedupFilter;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// Reads item keys from stdin, one per line, and prints `new` or `dup` for each.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = settings::load()?;
    logging::init(&settings.log_level);
    metrics::init_metrics();
    info!(environment = %settings.environment, "Loaded settings");

    let store = Arc::new(RedisBitStore::connect(&settings.redis).await?);
    let filter = DedupFilter::new(
        settings.filter.clone(),
        &settings.breaker,
        store,
        settings.redis.base_timeout(),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        match filter.check_and_set(key).await {
            Ok(true) => stdout.write_all(format!("new\t{}\n", key).as_bytes()).await?,
            Ok(false) => stdout.write_all(format!("dup\t{}\n", key).as_bytes()).await?,
            Err(e) if e.is_retryable() => warn!(key, error = %e, "Dedup check failed"),
            Err(e) => {
                error!(key, error = %e, "Dedup check failed, stopping");
                return Err(e.into());
            }
        }
    }
    stdout.flush().await?;

    let stats = filter.stats();
    filter.close().await?;
    info!(checks = stats.checks, hits = stats.hits, misses = stats.misses, "Done");
    Ok(())
}
