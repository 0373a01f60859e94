//! Tickwatch node - main entry point
//!
//! Wires the whole observer together: configuration, store connections,
//! peer bootstrap, committee load, the pipeline stages, the HTTP/WS
//! surface, and graceful shutdown in pipeline order.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use tickwatch_api::{create_api_router, ws, SubscriptionManager};
use tickwatch_network::{
    fetch_directory_peers, parse_endpoint, run_receiver, ConnectionPool, PeerConnection,
    PeerServer, Trust,
};
use tickwatch_pipeline::{
    garbage, processor, reconciler, runtime::advance_to, sc_query, scheduler, verifier, Runtime,
    TickStorageMode,
};
use tickwatch_storage::{keys, ArchiveStore, RedisArchiveStore, RedisTickStore, TickStore};
use tickwatch_types::crypto::NodeKeys;
use tickwatch_types::identity::identity_from_public_key;
use tickwatch_types::wire::frame;
use tickwatch_types::PacketType;

use crate::config::{redis_url, NodeConfig};

/// Progress report period of the main loop.
const REPORT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "tickwatch-node", about = "Verifying observer of a tick-based ledger")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "tickwatch.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match NodeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Failed to load config '{}': {}", cli.config.display(), message);
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal error");
            ExitCode::from(99)
        }
    }
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    if config.is_trusted_node {
        let seed = config.node_seed.as_deref().unwrap_or_default();
        let keys = NodeKeys::from_seed(seed);
        let identity = identity_from_public_key(&keys.public_key(), false);
        info!(identity = %identity, "trusted node identity");
    }

    // Warm tier first; everything else depends on it.
    let store: Arc<dyn TickStore> =
        Arc::new(RedisTickStore::connect(&redis_url(&config.keydb_url)).await?);
    let status = store.get_status().await?;
    let latest_verified = store.get_latest_verified_tick().await?.unwrap_or(0);
    let last_indexed = store.get_last_indexed_tick().await?.unwrap_or(0);
    info!(
        tick = status.latest_tick,
        epoch = status.latest_epoch,
        event_tick = status.latest_event_tick,
        verified = latest_verified,
        indexed = last_indexed,
        "loaded store status"
    );

    let archive: Option<Arc<dyn ArchiveStore>> =
        if config.storage_mode().ok() == Some(TickStorageMode::ColdTier) {
            let url = config.kvrocks_url.as_deref().unwrap_or_default();
            let archive = RedisArchiveStore::connect(&redis_url(url)).await?;
            info!("connected to cold tier");
            Some(Arc::new(archive))
        } else {
            None
        };

    // Build the connection pool from configured peers plus the directory.
    let mut connections: Vec<Arc<PeerConnection>> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (raw, trust) in config
        .trusted_node
        .iter()
        .map(|raw| (raw, Trust::Trusted))
        .chain(config.p2p_node.iter().map(|raw| (raw, Trust::P2p)))
    {
        match parse_endpoint(raw) {
            Ok(endpoint) => {
                if seen.insert(endpoint.address()) {
                    connections.push(Arc::new(PeerConnection::new(endpoint, trust)));
                }
            }
            Err(err) => warn!(endpoint = %raw, error = %err, "skipping bad endpoint"),
        }
    }
    if let Some(directory) = config.peer_directory_url.as_deref() {
        for raw in fetch_directory_peers(directory).await {
            if let Ok(endpoint) = parse_endpoint(&raw) {
                if seen.insert(endpoint.address()) {
                    connections.push(Arc::new(PeerConnection::new(endpoint, Trust::P2p)));
                }
            }
        }
    }
    if connections.is_empty() {
        error!("0 valid connections");
        std::process::exit(1);
    }
    let pool = Arc::new(ConnectionPool::new(connections));

    let runtime = Arc::new(Runtime::new(
        config.pipeline_config(),
        store.clone(),
        archive,
        pool.clone(),
    ));
    runtime.set_epoch(status.latest_epoch);

    // Bootstrap: wait until a peer reports a usable chain head. When the
    // stored epoch already ended we hold out for the next epoch's head.
    let epoch_already_ended = store
        .get_u32(&keys::end_epoch_tick(status.latest_epoch))
        .await?
        .is_some();
    let bootstrap = loop {
        if let Some(info) = pool.handshake_and_bootstrap().await {
            let usable = info.initial_tick > 0
                && (info.epoch > status.latest_epoch
                    || (!epoch_already_ended && info.epoch == status.latest_epoch));
            if usable {
                break info;
            }
            if epoch_already_ended {
                info!(
                    peer_tick = info.initial_tick,
                    peer_epoch = info.epoch,
                    "waiting for new epoch info from peers"
                );
            } else {
                info!(
                    peer_tick = info.initial_tick,
                    peer_epoch = info.epoch,
                    "doing handshakes and asking for bootstrap info"
                );
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    };
    info!(
        initial_tick = bootstrap.initial_tick,
        epoch = bootstrap.epoch,
        "bootstrap complete"
    );
    store
        .set_u32(&keys::init_tick(bootstrap.epoch), bootstrap.initial_tick)
        .await?;
    runtime.set_epoch(bootstrap.epoch.max(status.latest_epoch));
    runtime
        .initial_tick
        .store(bootstrap.initial_tick, Ordering::Release);

    // Frontier floors: resume from the store, never before the epoch's
    // initial tick.
    let floor = bootstrap.initial_tick.saturating_sub(1);
    advance_to(&runtime.frontiers.fetch, status.latest_tick.max(floor));
    advance_to(&runtime.frontiers.log_fetch, status.latest_event_tick.max(floor));
    advance_to(&runtime.frontiers.verify, latest_verified.max(floor));
    advance_to(&runtime.frontiers.log_verify, last_indexed.max(floor));
    advance_to(&runtime.frontiers.index, last_indexed.max(floor));

    // Receivers and data workers must run before the committee can load.
    let mut receiver_tasks = Vec::new();
    for conn in pool.connections() {
        receiver_tasks.push(tokio::spawn(run_receiver(
            conn.clone(),
            runtime.buffers.route_buffers(),
            runtime.receiver_counters.clone(),
            runtime.shutdown.clone(),
        )));
    }

    let worker_count = pool.len().max(4);
    info!(workers = worker_count, "starting data processors");
    let mut data_tasks = Vec::new();
    for _ in 0..worker_count {
        data_tasks.push(tokio::spawn(processor::run_data_worker(runtime.clone())));
    }
    data_tasks.push(tokio::spawn(sc_query::run_request_processor(runtime.clone())));
    data_tasks.push(tokio::spawn(sc_query::run_sc_forwarder(runtime.clone())));

    // Load the committee for the current epoch.
    while runtime
        .committee()
        .map_or(true, |c| c.epoch != runtime.current_epoch())
    {
        let request = frame(PacketType::RequestComputors, rand_nonce(), &[]);
        let _ = pool.send_to_random(&request).await;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted before committee load");
                return Ok(());
            }
        }
    }
    info!(epoch = runtime.current_epoch(), "committee ready");

    // Pipeline stages.
    let mut verify_tasks = vec![
        tokio::spawn(scheduler::run_tick_scheduler(runtime.clone())),
        tokio::spawn(scheduler::run_log_scheduler(runtime.clone())),
        tokio::spawn(verifier::run_verifier(runtime.clone())),
        tokio::spawn(reconciler::run_reconciler(runtime.clone())),
    ];
    let indexer_task = tokio::spawn(tickwatch_pipeline::indexer::run_indexer(runtime.clone()));
    let garbage_task = tokio::spawn(garbage::run_garbage_cleaner(runtime.clone()));

    // Read-only surface.
    let subscriptions = Arc::new(SubscriptionManager::new(store.clone()));
    verify_tasks.push(tokio::spawn(ws::run_dispatch(
        subscriptions.clone(),
        runtime.clone(),
    )));
    let router = create_api_router(runtime.clone(), subscriptions);
    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port)).await?;
    info!(port = config.api_port, "REST API server listening");
    let api_shutdown = runtime.shutdown.clone();
    let api_task = tokio::spawn(async move {
        let served = axum::serve(api_listener, router)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
        if let Err(err) = served.await {
            error!(error = %err, "API server failed");
        }
    });

    // Optional inbound peer listener.
    let server_task = if config.run_server {
        let server = Arc::new(PeerServer::new(
            config.server_port as u16,
            runtime.buffers.route_buffers(),
            runtime.receiver_counters.clone(),
            runtime.shutdown.clone(),
        ));
        Some(tokio::spawn(async move {
            if let Err(err) = server.run().await {
                error!(error = %err, "peer server failed");
            }
        }))
    } else {
        None
    };

    // Progress reporting until interrupted or the epoch closes.
    let mut previous = [0u32; 4];
    let mut last_report = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(REPORT_PERIOD) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }

        let elapsed = last_report.elapsed().as_secs_f32().max(0.001);
        last_report = Instant::now();
        let current = [
            runtime.frontiers.fetch.load(Ordering::Acquire),
            runtime.frontiers.log_fetch.load(Ordering::Acquire),
            runtime.frontiers.log_verify.load(Ordering::Acquire),
            runtime.frontiers.index.load(Ordering::Acquire),
        ];
        let speed = |now: u32, before: u32| {
            if before == 0 {
                0.0
            } else {
                (now.saturating_sub(before)) as f32 / elapsed
            }
        };
        info!(
            "state: fetching {} ({:.1}/s) | fetching logs {} ({:.1}/s) | verifying logs {} ({:.1}/s) | indexing {} ({:.1}/s)",
            current[0], speed(current[0], previous[0]),
            current[1], speed(current[1], previous[1]),
            current[2], speed(current[2], previous[2]),
            current[3], speed(current[3], previous[3]),
        );
        previous = current;
        runtime.sc_responses.sweep();

        if runtime.end_epoch_seen.load(Ordering::Acquire) {
            let epoch = runtime.current_epoch();
            let end_tick = store.get_u32(&keys::end_epoch_tick(epoch)).await?.unwrap_or(0);
            if end_tick > 0 && runtime.frontiers.index.load(Ordering::Acquire) >= end_tick {
                info!(epoch, end_tick, "epoch fully processed, shutting down");
                break;
            }
        }
    }

    // Graceful shutdown: stop emitters, break blocked reads, wake
    // consumers, then join in pipeline order.
    runtime.shutdown.cancel();
    pool.disconnect_all().await;
    runtime.buffers.close_all();

    join_all("receivers", receiver_tasks).await;
    join_all("data workers", data_tasks).await;
    join_all("verifier stages", verify_tasks).await;
    let _ = indexer_task.await;
    info!("exited indexer");
    let _ = garbage_task.await;
    info!("exited garbage cleaner");
    let _ = api_task.await;
    if let Some(task) = server_task {
        let _ = task.await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn join_all(label: &str, tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
    info!("exited {label}");
}

fn rand_nonce() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}
