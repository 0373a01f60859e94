//! tickprune - delete every artifact of a tick range from the warm tier.
//!
//! Log events are removed through each tick's aggregate range before the
//! range metadata itself goes, so no orphaned log keys remain.

use clap::Parser;
use tracing::info;

use tickwatch_storage::{RedisTickStore, TickStore};

#[derive(Parser)]
#[command(name = "tickprune", about = "Delete a tick range from the warm tier")]
struct Cli {
    /// First tick to delete, inclusive.
    start_tick: u32,
    /// Last tick to delete, inclusive.
    end_tick: u32,
    /// Epoch the ticks belong to.
    epoch: u16,
    /// Warm-tier URL.
    #[arg(default_value = "redis://127.0.0.1:6379")]
    redis_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();
    if cli.start_tick > cli.end_tick {
        anyhow::bail!("start_tick must be <= end_tick");
    }

    info!(url = %cli.redis_url, "connecting to warm tier");
    let store = RedisTickStore::connect(&cli.redis_url).await?;

    info!(
        from = cli.start_tick,
        to = cli.end_tick,
        epoch = cli.epoch,
        "deleting tick range"
    );

    for tick in cli.start_tick..=cli.end_tick {
        // The log range must be read before the metadata is deleted, or
        // the log ids to remove are unknowable.
        if let Some(aggregate) = store.get_tick_log_range(tick).await? {
            if !aggregate.is_empty() {
                store
                    .delete_logs(
                        cli.epoch,
                        aggregate.from_log_id as u64,
                        aggregate.to_log_id() as u64,
                    )
                    .await?;
            }
        }
        store.delete_log_ranges(tick).await?;
        store.delete_tick_data(tick).await?;
        store.delete_tick_votes(tick).await?;

        if tick % 1000 == 0 {
            info!(tick, "processed");
        }
    }

    info!("deletion complete");
    Ok(())
}
