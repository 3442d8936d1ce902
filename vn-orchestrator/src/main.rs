//! Local entry point: run one request against a live store.

use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vn_orchestrator::RequestEvent;
use vn_orchestrator::RequestOrchestrator;
use vn_orchestrator::Store;
use vn_orchestrator::hydration::fetchers::CompositeResourceFetcher;
use vn_orchestrator::hydration::fetchers::FileResourceFetcher;
use vn_orchestrator::hydration::fetchers::S3ResourceFetcher;
use vn_orchestrator::invoker::StreamTaskInvoker;
use vn_orchestrator::store::RedisStore;

#[derive(Parser)]
#[command(about = "Run the request orchestrator locally")]
struct Args {
    /// JSON payload passed to the orchestrator.
    payload: String,

    /// Store connection URL.
    #[arg(env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    store_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let event: RequestEvent =
        serde_json::from_str(&args.payload).context("payload is not a valid request event")?;

    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(&args.store_url)
            .await
            .context("unable to connect to the store")?,
    );
    if !store.exists(&event.xml_key).await? {
        bail!("XML payload {} is missing before invocation", event.xml_key);
    }

    let invoker = Arc::new(StreamTaskInvoker::new(store.clone()));
    let fetcher = Rc::new(CompositeResourceFetcher::new(vec![
        Box::new(FileResourceFetcher),
        Box::new(S3ResourceFetcher::from_env().await),
    ]));

    let orchestrator = RequestOrchestrator::new(store, invoker).with_fetcher(fetcher);
    let outcome = orchestrator.run(&event).await?;
    println!(
        "request {} completed: {} group(s), response at {}",
        event.request_id, outcome.group_count, outcome.response_key
    );
    Ok(())
}
