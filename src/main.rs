use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imageflight::application::PrecacheAssistant;
use imageflight::domain::entities::{ResourceId, ScalingDescriptor, WaiterHandle};
use imageflight::domain::ports::{
    AsyncOperationsObserver, PrecacheInformationProvider, PrecachePort, PrecacheRequest,
};
use imageflight::infrastructure::{
    AppConfig, ChannelWaiter, CliArgs, DecodedImage, ImageCacher, LookupOutcome, LruPayloadCache,
    SimulatedBackend, StorageManager, WorkloadArgs, dispatch_events,
};

const RESULT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let config = match StorageManager::new() {
        Ok(storage) => storage.load_config(args.config.as_deref())?,
        Err(e) => match args.config.as_deref() {
            Some(path) => StorageManager::load_from(path)?,
            None => {
                eprintln!("{e}, using default configuration");
                AppConfig::default()
            }
        },
    };
    Ok(config)
}

fn resource_for(index: usize) -> ResourceId {
    ResourceId::new(format!("https://images.example/{index}.png"))
}

fn list_resource_for(row: usize) -> ResourceId {
    ResourceId::new(format!("https://images.example/list/{row}.png"))
}

fn scaling_for(widths: &[u32], index: usize) -> ScalingDescriptor {
    if widths.is_empty() {
        return ScalingDescriptor::unbounded();
    }
    ScalingDescriptor::bounded(widths[index % widths.len()], 0)
}

#[derive(Debug, Default)]
struct RoundReport {
    hits: usize,
    queued: usize,
    cancelled: usize,
    delivered: usize,
    failed: usize,
}

async fn run_round(
    cacher: &ImageCacher<DecodedImage>,
    workload: &WorkloadArgs,
) -> Result<RoundReport> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut report = RoundReport::default();
    let resources = workload.resources.max(1);

    for id in 0..workload.requests {
        let waiter = WaiterHandle::new(Arc::new(ChannelWaiter::new(id, tx.clone())));
        let resource = resource_for(id % resources);
        let scaling = scaling_for(&workload.widths, id);

        if let LookupOutcome::Hit(_) = cacher.get_payload(&waiter, &resource, scaling) {
            report.hits += 1;
            continue;
        }
        report.queued += 1;
        if workload.cancel_every > 0 && (id + 1) % workload.cancel_every == 0 {
            cacher.cancel(&waiter);
            report.cancelled += 1;
        }
    }
    drop(tx);

    // The channel closes once every queued waiter has been resolved or cancelled.
    loop {
        let event = tokio::time::timeout(RESULT_TIMEOUT, rx.recv())
            .await
            .map_err(|_| eyre!("timed out waiting for image results"))?;
        let Some(event) = event else {
            break;
        };
        match event.result {
            Ok(_) => report.delivered += 1,
            Err(reason) => {
                warn!(id = event.id, %reason, "Request failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Rows of a simulated list, one image per row.
struct ListRows {
    rows: usize,
    widths: Vec<u32>,
}

impl PrecacheInformationProvider for ListRows {
    fn count(&self) -> usize {
        self.rows
    }

    fn requests_for_row(&self, position: usize) -> Vec<PrecacheRequest> {
        if position >= self.rows {
            return Vec::new();
        }
        vec![PrecacheRequest::new(
            list_resource_for(position),
            scaling_for(&self.widths, position),
        )]
    }
}

async fn wait_until_idle(
    cacher: &ImageCacher<DecodedImage>,
    backend: &SimulatedBackend,
) -> Result<()> {
    tokio::time::timeout(RESULT_TIMEOUT, async {
        while backend.running_jobs() > 0 || cacher.coordinator().pending_waiters() > 0 {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    })
    .await
    .map_err(|_| eyre!("timed out waiting for precache jobs"))
}

async fn scroll_list(
    cacher: &Arc<ImageCacher<DecodedImage>>,
    backend: &SimulatedBackend,
    config: &AppConfig,
    workload: &WorkloadArgs,
) -> Result<()> {
    let provider = Arc::new(ListRows {
        rows: workload.scroll_rows,
        widths: workload.widths.clone(),
    });
    let mut assistant =
        PrecacheAssistant::new(Arc::clone(cacher) as Arc<dyn PrecachePort>, provider);
    assistant.set_memory_range(config.precache.memory_range);
    assistant.set_disk_range(config.precache.disk_range);

    for position in 0..workload.scroll_rows {
        assistant.on_position_visited(position);
        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
    }
    wait_until_idle(cacher, backend).await?;

    let local = (0..workload.scroll_rows)
        .filter(|&row| backend.has_local_copy(&list_resource_for(row)))
        .count();
    println!(
        "scroll: {} rows visited, {local} stored locally",
        workload.scroll_rows
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let workload = args.workload.clone();
    let mut config = load_config(&args)?;
    config.merge_with_args(args);

    init_logging(&config)?;

    info!(version = imageflight::VERSION, "Starting {}", imageflight::NAME);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(SimulatedBackend::new(
        config.backend_config(),
        event_tx,
        tokio::runtime::Handle::current(),
    ));
    let cacher = Arc::new(ImageCacher::new(
        Arc::new(LruPayloadCache::new(config.cache.memory_budget_bytes)),
        Arc::clone(&backend) as Arc<dyn AsyncOperationsObserver>,
        config.cache.pixel_format,
    ));
    let dispatcher = tokio::spawn(dispatch_events(Arc::clone(&cacher), event_rx));

    for round in 1..=workload.rounds {
        let report = run_round(&cacher, &workload).await?;
        info!(round, ?report, "Round finished");
        println!(
            "round {round}: {} requests, {} hits, {} queued, {} cancelled, {} delivered, {} failed",
            workload.requests,
            report.hits,
            report.queued,
            report.cancelled,
            report.delivered,
            report.failed
        );
    }

    if workload.scroll_rows > 0 {
        scroll_list(&cacher, &backend, &config, &workload).await?;
    }

    let counters = backend.counters();
    println!(
        "backend: {} fetches ({} cancelled), {} decodes ({} cancelled)",
        counters.fetches_started,
        counters.fetches_cancelled,
        counters.decodes_started,
        counters.decodes_cancelled
    );
    println!("cache: {}", cacher.cache_stats());

    drop(cacher);
    dispatcher.abort();

    Ok(())
}
