mod config;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fork_choice::{ChainEvent, ChainState, ChainStateConfig, SNAPSHOT_FILE_NAME};
use metrics::{server::run_metrics_server, Metrics};
use networking::banlist::{BanList, BANLIST_FILE_NAME};
use networking::discouragement::DiscouragementFilter;
use networking::network::{NetworkConfig, NetworkService};
use networking::sync::{PeerManager, SyncService};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio::{signal, task};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validator::{Clock, HeaderValidator, MockableClock};

use crate::config::{Args, FileConfig, NodeConfig};

/// Seconds between header snapshot writes.
const SNAPSHOT_FLUSH_INTERVAL_SECS: u64 = 60;
const METRICS_SAMPLE_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = NodeConfig::resolve(&args, file);

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid log level")?,
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        network = %config.params.network,
        datadir = %config.datadir.display(),
        "Starting header node"
    );
    fs::create_dir_all(&config.datadir)
        .with_context(|| format!("failed to create data directory {}", config.datadir.display()))?;

    let clock = Arc::new(MockableClock::new());
    if let Some(time) = config.mock_time {
        warn!(time, "Clock pinned to mock time");
        clock.set(time);
    }
    let clock: Arc<dyn Clock> = clock;

    let validator = HeaderValidator::new(Arc::new(config.params.clone()), clock.clone());
    let chain = ChainState::open(
        validator,
        ChainStateConfig {
            snapshot_path: Some(config.datadir.join(SNAPSHOT_FILE_NAME)),
            suspicious_reorg_depth: config.suspicious_reorg_depth,
        },
    )
    .context("failed to load header chain")?;
    let chain = Arc::new(chain);
    let tip = chain.best_tip()?;
    info!(
        height = tip.height,
        hash = %tip.hash,
        headers = chain.header_count(),
        suspicious_reorg_depth = chain.suspicious_reorg_depth(),
        "Header chain loaded"
    );

    let bans = BanList::load(config.datadir.join(BANLIST_FILE_NAME), clock.now())?;
    let peer_manager = PeerManager::with_lists(clock.clone(), DiscouragementFilter::default(), bans);
    let sync = SyncService::new(chain.clone(), peer_manager, config.sync);

    let network = NetworkService::new(
        NetworkConfig {
            listen: config.listen,
            listen_addr: config.listen_addr,
            static_peers: config.static_peers.clone(),
            magic: config.params.magic,
        },
        sync.clone(),
    );
    let mut network_handle = task::spawn(network.start());

    if let Some(metrics_config) = config.metrics.clone() {
        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        task::spawn(report_metrics(sync.clone(), metrics.clone()));
        task::spawn(async move {
            if let Err(err) = run_metrics_server(metrics_config, metrics).await {
                error!(%err, "Metrics server exited");
            }
        });
    }

    let mut flush_interval = interval(Duration::from_secs(SNAPSHOT_FLUSH_INTERVAL_SECS));
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                if let Err(err) = chain.flush() {
                    error!(%err, "Periodic header snapshot failed");
                }
            }
            finished = &mut network_handle => {
                match finished {
                    Ok(Ok(())) => warn!("Network service stopped"),
                    Ok(Err(err)) => return Err(err.context("network service failed")),
                    Err(err) => return Err(anyhow::Error::new(err).context("network task panicked")),
                }
                break;
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    network_handle.abort();
    if let Err(err) = sync.peer_manager().lock().save_bans() {
        warn!(%err, "Failed to save ban list");
    }
    chain.flush().context("failed to write header snapshot on shutdown")?;
    info!("Header node stopped");
    Ok(())
}

/// Samples chain and peer gauges and counts reorgs as they happen.
async fn report_metrics(sync: SyncService, metrics: Arc<Metrics>) {
    let chain = sync.chain().clone();
    let mut events = chain.subscribe();
    let mut ticker = interval(Duration::from_secs(METRICS_SAMPLE_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Ok(tip) = chain.best_tip() {
                    metrics.set_best_height(tip.height as i64);
                }
                metrics.set_headers(chain.header_count() as i64);
                metrics.set_chain_tips(chain.tips().len() as i64);
                metrics.set_orphans(chain.orphan_count() as i64);
                metrics.set_initial_block_download(chain.is_initial_block_download());

                let peers = sync.peers();
                metrics.set_peers(peers.len() as i64);
                metrics.set_discouraged_peers(peers.iter().filter(|peer| peer.discouraged).count() as i64);
            }
            event = events.recv() => match event {
                Ok(ChainEvent::TipUpdated { reorg_depth, .. }) if reorg_depth > 0 => {
                    metrics.inc_reorgs();
                    metrics.observe_reorg_depth(reorg_depth as f64);
                }
                Ok(ChainEvent::TipUpdated { .. }) => {}
                Ok(ChainEvent::ReorgRefused { .. }) => metrics.inc_refused_reorgs(),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    }
}
