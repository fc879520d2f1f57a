//! Wallet monitor - polls the wallet's signatures and feeds new transactions
//! through the classification pipeline

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::lookup::TokenDataSource;
use crate::modules::pipeline::ClassificationPipeline;
use crate::types::{shorten_address, WalletTransaction};
use crate::utils::solana::LogEvent;
use crate::utils::SolanaService;

/// Source of the monitored wallet's transaction history
pub trait WalletFeed: Send + Sync + 'static {
    /// Most recent signatures for the wallet, newest first
    fn recent_signatures(&self, limit: usize) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Fetch and decode one transaction; `None` when it is not available yet
    fn fetch(&self, signature: &str) -> impl Future<Output = Result<Option<WalletTransaction>>> + Send;

    /// Activity notifications that wake the monitor before the next tick
    fn activity(&self) -> broadcast::Receiver<LogEvent>;
}

impl WalletFeed for SolanaService {
    async fn recent_signatures(&self, limit: usize) -> Result<Vec<String>> {
        self.get_recent_signatures(limit).await
    }

    async fn fetch(&self, signature: &str) -> Result<Option<WalletTransaction>> {
        self.fetch_wallet_transaction(signature).await
    }

    fn activity(&self) -> broadcast::Receiver<LogEvent> {
        self.subscribe_logs()
    }
}

/// Monitor statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub polls: u64,
    pub transactions_fetched: u64,
    pub transactions_skipped: u64,
    pub fetch_errors: u64,
    pub is_running: bool,
}

/// Ingestion loop for the monitored wallet
pub struct WalletMonitor<F: WalletFeed = SolanaService, S: TokenDataSource = SolanaService> {
    config: Config,
    feed: Arc<F>,
    pipeline: ClassificationPipeline<S>,
    shutdown: Arc<Notify>,

    is_running: Arc<AtomicBool>,
    polls: Arc<AtomicU64>,
    transactions_fetched: Arc<AtomicU64>,
    transactions_skipped: Arc<AtomicU64>,
    fetch_errors: Arc<AtomicU64>,
}

impl<F: WalletFeed, S: TokenDataSource> WalletMonitor<F, S> {
    pub fn new(config: Config, feed: Arc<F>, pipeline: ClassificationPipeline<S>) -> Self {
        Self {
            config,
            feed,
            pipeline,
            shutdown: Arc::new(Notify::new()),
            is_running: Arc::new(AtomicBool::new(false)),
            polls: Arc::new(AtomicU64::new(0)),
            transactions_fetched: Arc::new(AtomicU64::new(0)),
            transactions_skipped: Arc::new(AtomicU64::new(0)),
            fetch_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the monitor until [`stop`](Self::stop) is called.
    ///
    /// Polls on the configured interval and whenever the feed reports
    /// activity on the wallet. A transaction handed to the pipeline always
    /// finishes; `stop` takes effect before the next one. Returns an error
    /// only when the pipeline hits a fatal state error.
    pub async fn start(&self) -> Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "MONITOR", "Already running");
            return Ok(());
        }

        info!(
            target: "MONITOR",
            "👛 Watching {} every {}s",
            shorten_address(&self.config.wallet_address, 4),
            self.config.poll_interval_secs
        );
        self.pipeline.metrics().set_module_status("monitor", true);

        let mut activity = self.feed.activity();
        let mut subscribed = true;
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));

        let result = loop {
            tokio::select! {
                _ = self.shutdown.notified() => {}
                _ = interval.tick() => {}
                event = activity.recv(), if subscribed => match event {
                    Ok(event) => {
                        debug!(
                            target: "MONITOR",
                            "Log activity {} (failed: {})",
                            shorten_address(&event.signature, 6),
                            event.failed
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "MONITOR", "Lagged {} log events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(target: "MONITOR", "Log subscription closed, polling only");
                        subscribed = false;
                        continue;
                    }
                },
            }

            if !self.is_running.load(Ordering::SeqCst) {
                break Ok(());
            }

            if let Err(e) = self.poll_once().await {
                error!(target: "MONITOR", "Fatal: {}", e);
                break Err(e.into());
            }
        };

        self.is_running.store(false, Ordering::SeqCst);
        self.pipeline.metrics().set_module_status("monitor", false);
        info!(target: "MONITOR", "Wallet monitor stopped");
        result
    }

    /// Stop the monitor after the transaction in flight
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        info!(target: "MONITOR", "Wallet monitor stopping...");
    }

    /// Fetch recent signatures and classify the ones not seen before, oldest
    /// first. Returns how many transactions were classified.
    pub async fn poll_once(&self) -> Result<usize, PipelineError> {
        self.polls.fetch_add(1, Ordering::Relaxed);

        let mut signatures = match self.feed.recent_signatures(self.config.signature_fetch_limit).await {
            Ok(signatures) => signatures,
            Err(e) => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "MONITOR", "Failed to fetch signatures: {:#}", e);
                return Ok(0);
            }
        };
        signatures.reverse();

        let mut classified = 0;
        for signature in signatures {
            if !self.is_running.load(Ordering::SeqCst) {
                break;
            }

            match self.pipeline.database().is_processed(&signature) {
                Ok(true) => {
                    self.transactions_skipped.fetch_add(1, Ordering::Relaxed);
                    self.pipeline.metrics().transactions_skipped.inc();
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "MONITOR", "Processed check failed for {}: {:#}", signature, e);
                }
            }

            let tx = match self.feed.fetch(&signature).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    debug!(target: "MONITOR", "{} not available yet", shorten_address(&signature, 6));
                    continue;
                }
                Err(e) => {
                    self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    error!(target: "MONITOR", "Failed to fetch {}: {:#}", signature, e);
                    continue;
                }
            };
            self.transactions_fetched.fetch_add(1, Ordering::Relaxed);

            self.pipeline.process(tx).await?;
            classified += 1;
        }

        self.pipeline.maintain(Utc::now().timestamp());
        Ok(classified)
    }

    pub fn get_stats(&self) -> MonitorStats {
        MonitorStats {
            polls: self.polls.load(Ordering::Relaxed),
            transactions_fetched: self.transactions_fetched.load(Ordering::Relaxed),
            transactions_skipped: self.transactions_skipped.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            is_running: self.is_running.load(Ordering::SeqCst),
        }
    }
}

impl<F: WalletFeed, S: TokenDataSource> Clone for WalletMonitor<F, S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            feed: Arc::clone(&self.feed),
            pipeline: self.pipeline.clone(),
            shutdown: Arc::clone(&self.shutdown),
            is_running: Arc::clone(&self.is_running),
            polls: Arc::clone(&self.polls),
            transactions_fetched: Arc::clone(&self.transactions_fetched),
            transactions_skipped: Arc::clone(&self.transactions_skipped),
            fetch_errors: Arc::clone(&self.fetch_errors),
        }
    }
}
