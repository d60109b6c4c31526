pub mod server;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    discouraged_peers: IntGauge,
    // Header chain
    best_height: IntGauge,
    headers: IntGauge,
    chain_tips: IntGauge,
    orphans: IntGauge,
    initial_block_download: IntGauge,
    reorgs: IntCounter,
    reorg_depth: Histogram,
    refused_reorgs: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new("network_peers_connected", "Number of connected peers"))?;
        registry.register(Box::new(peers.clone()))?;

        let discouraged_peers = IntGauge::with_opts(Opts::new(
            "network_peers_discouraged",
            "Connected peers whose misbehavior score reached the threshold",
        ))?;
        registry.register(Box::new(discouraged_peers.clone()))?;

        let best_height = IntGauge::with_opts(Opts::new("header_chain_best_height", "Height of the active tip"))?;
        registry.register(Box::new(best_height.clone()))?;

        let headers = IntGauge::with_opts(Opts::new("header_chain_headers", "Headers in the store"))?;
        registry.register(Box::new(headers.clone()))?;

        let chain_tips = IntGauge::with_opts(Opts::new("header_chain_tips", "Known chain tips, active included"))?;
        registry.register(Box::new(chain_tips.clone()))?;

        let orphans = IntGauge::with_opts(Opts::new("header_chain_orphans", "Headers waiting for their parent"))?;
        registry.register(Box::new(orphans.clone()))?;

        let initial_block_download = IntGauge::with_opts(Opts::new(
            "header_chain_initial_download",
            "1 while the node is in initial block download",
        ))?;
        registry.register(Box::new(initial_block_download.clone()))?;

        let reorgs = IntCounter::with_opts(Opts::new("header_chain_reorgs_total", "Total number of reorgs"))?;
        registry.register(Box::new(reorgs.clone()))?;

        let reorg_depth = Histogram::with_opts(
            HistogramOpts::new("header_chain_reorg_depth", "Depth of reorgs (in blocks)")
                .buckets(vec![1.0, 2.0, 3.0, 5.0, 7.0, 10.0, 20.0, 30.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(reorg_depth.clone()))?;

        let refused_reorgs = IntCounter::with_opts(Opts::new(
            "header_chain_refused_reorgs_total",
            "Heavier forks not adopted because the reorg was too deep",
        ))?;
        registry.register(Box::new(refused_reorgs.clone()))?;

        Ok(Self {
            registry,
            peers,
            discouraged_peers,
            best_height,
            headers,
            chain_tips,
            orphans,
            initial_block_download,
            reorgs,
            reorg_depth,
            refused_reorgs,
        })
    }

    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    // Network
    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    pub fn set_discouraged_peers(&self, v: i64) {
        self.discouraged_peers.set(v);
    }

    // Header chain
    pub fn set_best_height(&self, v: i64) {
        self.best_height.set(v);
    }

    pub fn set_headers(&self, v: i64) {
        self.headers.set(v);
    }

    pub fn set_chain_tips(&self, v: i64) {
        self.chain_tips.set(v);
    }

    pub fn set_orphans(&self, v: i64) {
        self.orphans.set(v);
    }

    pub fn set_initial_block_download(&self, active: bool) {
        self.initial_block_download.set(i64::from(active));
    }

    pub fn inc_reorgs(&self) {
        self.reorgs.inc();
    }

    pub fn observe_reorg_depth(&self, depth: f64) {
        self.reorg_depth.observe(depth);
    }

    pub fn inc_refused_reorgs(&self) {
        self.refused_reorgs.inc();
    }
}

pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_header_chain_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.set_best_height(15);
        metrics.set_peers(3);
        metrics.inc_reorgs();
        metrics.observe_reorg_depth(5.0);
        metrics.set_initial_block_download(true);

        let text = metrics.gather().unwrap();
        assert!(text.contains("header_chain_best_height 15"));
        assert!(text.contains("network_peers_connected 3"));
        assert!(text.contains("header_chain_reorgs_total 1"));
        assert!(text.contains("header_chain_reorg_depth_count 1"));
        assert!(text.contains("header_chain_initial_download 1"));
    }
}
