//! Polling worker loop: consumes the dispatch stream as a consumer group
//! and processes each entry with the task processor.

use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vn_orchestrator::Store;
use vn_orchestrator::constants::TASK_DISPATCH_STREAM;
use vn_orchestrator::constants::TASK_WORKERS_GROUP;
use vn_orchestrator::store::RedisStore;
use vn_worker::TaskProcessor;

#[derive(Parser)]
#[command(about = "Run the task processor worker loop")]
struct Args {
    /// Store connection URL.
    #[arg(env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    store_url: String,

    /// Consumer group name for the dispatch stream.
    #[arg(long, default_value = TASK_WORKERS_GROUP)]
    group: String,

    /// Block duration in milliseconds for each stream read.
    #[arg(long, default_value_t = 1_000)]
    block_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let store: Arc<dyn Store> = Arc::new(RedisStore::connect(&args.store_url).await?);
    let processor = TaskProcessor::new(store.clone());

    // Workers replay from the beginning of the stream on first start.
    store
        .ensure_group(TASK_DISPATCH_STREAM, &args.group, "0")
        .await?;
    let consumer = format!("worker-{}", Uuid::new_v4().simple());
    info!(group = %args.group, consumer = %consumer, "worker loop started");

    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        let entries = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
            read = store.read_group(TASK_DISPATCH_STREAM, &args.group, &consumer, 5, args.block_ms) => {
                match read {
                    Ok(entries) => entries,
                    Err(err) if err.is_missing_group() => {
                        store
                            .ensure_group(TASK_DISPATCH_STREAM, &args.group, "0")
                            .await?;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        for entry in entries {
            if let Err(err) = processor.handle_dispatch(&entry).await {
                error!(entry = %entry.id, error = %err, "task processing raised an error");
            }
            store
                .ack(TASK_DISPATCH_STREAM, &args.group, &entry.id)
                .await?;
        }
    }

    info!("worker loop stopped");
    Ok(())
}
