//! Prometheus metrics service for WalletGuard

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;
use tracing::info;

use crate::types::Category;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Ingestion
    pub transactions_processed: Counter,
    pub transactions_skipped: Counter,
    pub lookup_failures: CounterVec,

    // Classification
    pub verdicts_flagged: CounterVec,
    pub known_entries: GaugeVec,

    // Alerts
    pub alerts_emitted: CounterVec,
    pub alerts_suppressed: CounterVec,

    // System
    pub rpc_requests: CounterVec,
    pub rpc_latency: HistogramVec,
    pub websocket_connected: Gauge,
    pub module_status: GaugeVec,
    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transactions_processed = Counter::new(
            "walletguard_transactions_processed_total",
            "Transactions classified",
        )?;
        let transactions_skipped = Counter::new(
            "walletguard_transactions_skipped_total",
            "Transactions skipped as already processed",
        )?;
        let lookup_failures = CounterVec::new(
            Opts::new("walletguard_lookup_failures_total", "Token lookups that timed out"),
            &["source"],
        )?;

        let verdicts_flagged = CounterVec::new(
            Opts::new("walletguard_verdicts_flagged_total", "Flagged verdicts"),
            &["category"],
        )?;
        let known_entries = GaugeVec::new(
            Opts::new("walletguard_known_entries", "Size of persistent sets"),
            &["set"],
        )?;

        let alerts_emitted = CounterVec::new(
            Opts::new("walletguard_alerts_emitted_total", "Alerts passed to delivery"),
            &["category"],
        )?;
        let alerts_suppressed = CounterVec::new(
            Opts::new("walletguard_alerts_suppressed_total", "Alerts held back by cooldown"),
            &["category"],
        )?;

        let rpc_requests = CounterVec::new(
            Opts::new("walletguard_rpc_requests_total", "RPC requests"),
            &["method", "status"],
        )?;
        let rpc_latency = HistogramVec::new(
            HistogramOpts::new("walletguard_rpc_latency_seconds", "RPC latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method"],
        )?;
        let websocket_connected = Gauge::new(
            "walletguard_websocket_connected",
            "WebSocket connection status",
        )?;
        let module_status = GaugeVec::new(
            Opts::new("walletguard_module_running", "Module status"),
            &["module"],
        )?;
        let uptime = Gauge::new("walletguard_uptime_seconds", "Application uptime")?;

        registry.register(Box::new(transactions_processed.clone()))?;
        registry.register(Box::new(transactions_skipped.clone()))?;
        registry.register(Box::new(lookup_failures.clone()))?;
        registry.register(Box::new(verdicts_flagged.clone()))?;
        registry.register(Box::new(known_entries.clone()))?;
        registry.register(Box::new(alerts_emitted.clone()))?;
        registry.register(Box::new(alerts_suppressed.clone()))?;
        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(websocket_connected.clone()))?;
        registry.register(Box::new(module_status.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            start_time: Instant::now(),
            transactions_processed,
            transactions_skipped,
            lookup_failures,
            verdicts_flagged,
            known_entries,
            alerts_emitted,
            alerts_suppressed,
            rpc_requests,
            rpc_latency,
            websocket_connected,
            module_status,
            uptime,
        })
    }

    pub fn record_flagged(&self, category: Category) {
        self.verdicts_flagged
            .with_label_values(&[category.as_str()])
            .inc();
    }

    pub fn record_alert(&self, category: Category, emitted: bool) {
        let counter = if emitted {
            &self.alerts_emitted
        } else {
            &self.alerts_suppressed
        };
        counter.with_label_values(&[category.as_str()]).inc();
    }

    pub fn record_rpc(&self, method: &str, ok: bool, seconds: f64) {
        self.rpc_requests
            .with_label_values(&[method, if ok { "ok" } else { "error" }])
            .inc();
        self.rpc_latency.with_label_values(&[method]).observe(seconds);
    }

    pub fn set_known_entries(&self, set: &str, count: usize) {
        self.known_entries.with_label_values(&[set]).set(count as f64);
    }

    /// Set module status
    pub fn set_module_status(&self, module: &str, running: bool) {
        self.module_status
            .with_label_values(&[module])
            .set(if running { 1.0 } else { 0.0 });
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> Result<String> {
        // Update uptime
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Clone for MetricsService {
    fn clone(&self) -> Self {
        // Prometheus handles are shared references to the same series
        Self {
            registry: self.registry.clone(),
            start_time: self.start_time,
            transactions_processed: self.transactions_processed.clone(),
            transactions_skipped: self.transactions_skipped.clone(),
            lookup_failures: self.lookup_failures.clone(),
            verdicts_flagged: self.verdicts_flagged.clone(),
            known_entries: self.known_entries.clone(),
            alerts_emitted: self.alerts_emitted.clone(),
            alerts_suppressed: self.alerts_suppressed.clone(),
            rpc_requests: self.rpc_requests.clone(),
            rpc_latency: self.rpc_latency.clone(),
            websocket_connected: self.websocket_connected.clone(),
            module_status: self.module_status.clone(),
            uptime: self.uptime.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = MetricsService::new().unwrap();
        metrics.record_flagged(Category::Honeypot);
        metrics.record_alert(Category::Honeypot, false);
        metrics.set_known_entries("honeypots", 3);

        let text = metrics.get_metrics().unwrap();
        assert!(text.contains("walletguard_verdicts_flagged_total{category=\"honeypot\"} 1"));
        assert!(text.contains("walletguard_alerts_suppressed_total"));
        assert!(text.contains("walletguard_known_entries{set=\"honeypots\"} 3"));
    }
}
