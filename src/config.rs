use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chain::{ChainParams, Network};
use clap::Parser;
use metrics::server::MetricsServerConfig;
use networking::sync::SyncConfig;
use serde::Deserialize;

pub const DEFAULT_METRICS_PORT: u16 = 9090;

#[derive(Parser, Debug, Default)]
#[command(about = "Headers-first proof-of-work node")]
pub struct Args {
    /// main, test or regtest
    #[arg(long)]
    pub network: Option<Network>,

    /// Directory for the header snapshot and ban list.
    #[arg(long)]
    pub datadir: Option<PathBuf>,

    #[arg(short, long)]
    pub address: Option<IpAddr>,

    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(long, conflicts_with = "no_listen")]
    pub listen: bool,

    #[arg(long)]
    pub no_listen: bool,

    /// Static peer, dialed as a manual connection. Repeatable.
    #[arg(long = "connect")]
    pub connect: Vec<SocketAddr>,

    /// Reorgs disconnecting this many active headers are refused; 0 disables the guard.
    #[arg(long)]
    pub suspicious_reorg_depth: Option<u64>,

    #[arg(long)]
    pub metrics: bool,

    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Pins the node clock to this unix time (regtest and testing).
    #[arg(long)]
    pub mock_time: Option<i64>,

    /// YAML file with the same settings; flags win over it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `networking=debug`. Overrides RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub network: Option<Network>,
    pub datadir: Option<PathBuf>,
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
    pub listen: Option<bool>,
    pub connect: Vec<SocketAddr>,
    pub suspicious_reorg_depth: Option<u64>,
    pub metrics: Option<bool>,
    pub metrics_address: Option<IpAddr>,
    pub metrics_port: Option<u16>,
    pub mock_time: Option<i64>,
    pub log_level: Option<String>,
    pub sync: Option<SyncConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Settings after merging flags over the config file over defaults.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub params: ChainParams,
    pub datadir: PathBuf,
    pub listen: bool,
    pub listen_addr: SocketAddr,
    pub static_peers: Vec<SocketAddr>,
    pub suspicious_reorg_depth: Option<u64>,
    pub metrics: Option<MetricsServerConfig>,
    pub mock_time: Option<i64>,
    pub log_level: Option<String>,
    pub sync: SyncConfig,
}

impl NodeConfig {
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        let network = args.network.or(file.network).unwrap_or(Network::Main);
        let params = ChainParams::for_network(network);

        let datadir = args
            .datadir
            .clone()
            .or(file.datadir)
            .unwrap_or_else(|| PathBuf::from("data").join(network.to_string()));

        let address = args
            .address
            .or(file.address)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = args.port.or(file.port).unwrap_or(params.default_port);

        let listen = if args.no_listen {
            false
        } else if args.listen {
            true
        } else {
            file.listen.unwrap_or(true)
        };

        let mut static_peers = file.connect;
        static_peers.extend(args.connect.iter().copied());
        static_peers.sort();
        static_peers.dedup();

        let metrics = (args.metrics || file.metrics.unwrap_or(false)).then(|| MetricsServerConfig {
            metrics_address: file
                .metrics_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            metrics_port: args
                .metrics_port
                .or(file.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
        });

        Self {
            params,
            datadir,
            listen,
            listen_addr: SocketAddr::new(address, port),
            static_peers,
            suspicious_reorg_depth: args.suspicious_reorg_depth.or(file.suspicious_reorg_depth),
            metrics,
            mock_time: args.mock_time.or(file.mock_time),
            log_level: args.log_level.clone().or(file.log_level),
            sync: file.sync.unwrap_or_default(),
        }
    }
}
