use clap::Parser;
use lane_engine::config::Config;
use lane_engine::initializer::QueueInitializer;
use lane_engine::registry::start_registry;
use lane_engine::scheduler::executor::ProcessingExecutor;
use lane_engine::scheduler::factory::WorkerIdentityFactory;
use lane_engine::scheduler::lanes::LaneScheduler;
use lane_engine::scheduler::types::WorkUnit;
use lane_engine::worker::queue::{LocalQueue, LocalQueueCleaner};
use lane_engine::worker::registry::TaskHandlerRegistry;
use lane_engine::worker::types::Task;
use lane_engine::worker::worker::QueueWorker;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lane-node", about = "Runs worker lanes against the task queue")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gossip address of this node. Enables clustering.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Gossip address of an existing member (repeatable).
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    #[arg(long)]
    cluster_name: Option<String>,

    /// Number of worker lanes.
    #[arg(long)]
    workers: Option<usize>,

    /// Delay before polling an empty queue again, in milliseconds.
    #[arg(long)]
    poll_delay_ms: Option<u64>,

    /// Number of demo tasks queued at startup.
    #[arg(long, default_value_t = 0)]
    demo_tasks: usize,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.cluster.enabled = true;
            config.cluster.local_endpoint = Some(bind);
        }
        if !self.seeds.is_empty() {
            config.cluster.seeds = self.seeds;
        }
        if let Some(name) = self.cluster_name {
            config.cluster.name = name;
        }
        if let Some(workers) = self.workers {
            config.scheduler.worker_count = workers;
        }
        if let Some(delay) = self.poll_delay_ms {
            config.scheduler.poll_delay_ms = delay;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let demo_tasks = args.demo_tasks;
    let config = args.into_config()?;

    if config.cluster.enabled {
        tracing::info!(
            "Starting clustered node '{}' on {:?}",
            config.cluster.name,
            config.cluster.local_endpoint
        );
    } else {
        tracing::info!("Starting standalone node");
    }

    // 1. Queue and handlers:
    let queue = LocalQueue::new();
    let handlers = TaskHandlerRegistry::new();
    handlers.register("sleep", |task| async move {
        let millis = task.payload["millis"].as_u64().unwrap_or(500);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    });

    for i in 0..demo_tasks {
        queue.submit(Task {
            handler: "sleep".to_string(),
            payload: serde_json::json!({ "millis": 200, "seq": i }),
        });
    }

    // 2. Lanes (built, not started):
    let factory = {
        let queue = queue.clone();
        let handlers = handlers.clone();
        WorkerIdentityFactory::new(move |uuid| {
            Arc::new(QueueWorker::new(uuid, queue.clone(), handlers.clone())) as Arc<dyn WorkUnit>
        })
    };
    let scheduler = Arc::new(LaneScheduler::new(
        &config.scheduler,
        Arc::new(ProcessingExecutor::current()),
        factory.as_ref(),
    )?);

    // 3. Worker registry:
    let registry = start_registry(&config.cluster, factory.clone()).await?;

    // 4. Cleanup, start lanes, publish identities:
    let initializer = QueueInitializer::new(
        Arc::new(LocalQueueCleaner::new(queue.clone())),
        scheduler.clone(),
        registry.clone(),
    );
    initializer.on_server_start().await?;

    // 5. Spawn stats reporter:
    let stats_registry = registry.clone();
    let stats_scheduler = scheduler.clone();
    let stats_queue = queue.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            tracing::info!(
                "Stats: {}/{} lanes running, {} pending task(s), {} worker(s) in cluster",
                stats_scheduler.running_lanes(),
                stats_scheduler.lane_count(),
                stats_queue.pending_count(),
                stats_registry.worker_uuids().len()
            );
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    reporter.abort();
    scheduler.stop();
    registry.stop().await;

    Ok(())
}
