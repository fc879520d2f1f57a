//! Classification pipeline - runs every classifier over a transaction and
//! emits rate-limited alerts

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{Config, ProgramCatalog, SharedSettings};
use crate::error::{PipelineError, SettingsError, StateError};
use crate::lookup::{TokenDataSource, TokenSnapshot};
use crate::modules::honeypot::{HoneypotClassifier, HoneypotStats};
use crate::modules::phishing::{PhishingClassifier, PhishingStats};
use crate::modules::suspicious::{SuspiciousActivityClassifier, SuspiciousStats};
use crate::modules::transfers::{TransferStats, TransferWatcher};
use crate::types::{shorten_address, Alert, ClassifiedTransaction, EventKind, WalletTransaction};
use crate::utils::{AlertService, DatabaseService, MetricsService, PersistentSet, RateLimiter};

/// Cooldown records older than this are dropped by [`ClassificationPipeline::maintain`]
const COOLDOWN_RECORD_TTL: i64 = 24 * 60 * 60;

/// Pipeline statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub transactions_processed: u64,
    pub transactions_flagged: u64,
    pub alerts_emitted: u64,
    pub honeypot: HoneypotStats,
    pub suspicious: SuspiciousStats,
    pub phishing: PhishingStats,
    pub transfers: TransferStats,
}

/// Everything known about one mint, as served by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub is_honeypot: bool,
    pub is_whitelisted: bool,
    pub is_known_token: bool,
    pub price_usd: Option<f64>,
    pub holder_count: Option<u64>,
    pub has_metadata: Option<bool>,
}

/// Runs the honeypot, suspicious-activity and phishing classifiers over each
/// transaction in order, adds transfer notices and hands flagged verdicts to
/// the alert service.
pub struct ClassificationPipeline<S: TokenDataSource> {
    source: Arc<S>,
    settings: SharedSettings,
    catalog: Arc<ProgramCatalog>,
    whitelist: Arc<PersistentSet>,
    honeypot: HoneypotClassifier,
    suspicious: SuspiciousActivityClassifier,
    phishing: PhishingClassifier,
    transfers: TransferWatcher,
    limiter: Arc<RateLimiter>,
    alerts: AlertService,
    metrics: MetricsService,
    database: DatabaseService,
    lookup_timeout: Duration,

    transactions_processed: Arc<AtomicU64>,
    transactions_flagged: Arc<AtomicU64>,
    alerts_emitted: Arc<AtomicU64>,
}

impl<S: TokenDataSource> ClassificationPipeline<S> {
    /// Build the pipeline, loading the persistent sets from the data directory
    pub fn new(
        config: &Config,
        source: Arc<S>,
        catalog: Arc<ProgramCatalog>,
        alerts: AlertService,
        metrics: MetricsService,
        database: DatabaseService,
    ) -> Result<Self> {
        let settings = SharedSettings::new(config.settings.clone());
        let whitelist = Arc::new(PersistentSet::load("whitelist", config.whitelist_file()));
        let honeypots = Arc::new(PersistentSet::load("honeypots", config.honeypot_file()));
        let suspicious = Arc::new(PersistentSet::load("suspicious", config.suspicious_file()));
        let phishing = Arc::new(PersistentSet::load("phishing", config.phishing_file()));

        let pipeline = Self {
            source,
            honeypot: HoneypotClassifier::new(
                settings.clone(),
                Arc::clone(&catalog),
                honeypots,
                Arc::clone(&whitelist),
            ),
            suspicious: SuspiciousActivityClassifier::new(
                settings.clone(),
                Arc::clone(&catalog),
                suspicious,
                Arc::clone(&whitelist),
            ),
            phishing: PhishingClassifier::new(settings.clone(), phishing, Arc::clone(&whitelist))?,
            transfers: TransferWatcher::new(settings.clone(), Arc::clone(&catalog)),
            settings,
            catalog,
            whitelist,
            limiter: Arc::new(RateLimiter::new()),
            alerts,
            metrics,
            database,
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            transactions_processed: Arc::new(AtomicU64::new(0)),
            transactions_flagged: Arc::new(AtomicU64::new(0)),
            alerts_emitted: Arc::new(AtomicU64::new(0)),
        };
        pipeline.refresh_gauges();
        Ok(pipeline)
    }

    /// Classify one transaction.
    ///
    /// Token lookups finish before any classifier state is touched. Only a
    /// lock timeout fails the call.
    pub async fn process(&self, tx: WalletTransaction) -> Result<ClassifiedTransaction, PipelineError> {
        let now = if tx.block_time > 0 {
            tx.block_time
        } else {
            Utc::now().timestamp()
        };

        let snapshots = self.lookup_all(&tx.mints()).await;

        let mut verdicts = Vec::new();

        for event in tx.events.iter().filter(|e| e.kind == EventKind::TokenTransfer) {
            if let Some(mint) = &event.mint {
                self.honeypot.track(mint, now);
            }
        }
        let mut honeypots = HashSet::new();
        for mint in tx.mints() {
            let snapshot = snapshots.get(&mint).cloned().unwrap_or_default();
            let verdict = self.honeypot.evaluate(&mint, &snapshot, now)?;
            if verdict.flagged {
                honeypots.insert(mint);
            }
            verdicts.push(verdict);
        }

        verdicts.extend(self.suspicious.evaluate(&tx, &snapshots, now)?.into_verdicts());
        verdicts.push(self.phishing.evaluate(&tx, now)?);

        for mint in tx.mints() {
            let Some(snapshot) = snapshots.get(&mint).filter(|_| !self.catalog.is_known_token(&mint)) else {
                continue;
            };
            if let Some(verdict) =
                self.phishing
                    .check_collection(&mint, snapshot, &self.catalog.popular_collections)?
            {
                verdicts.push(verdict);
            }
        }

        verdicts.extend(self.transfers.evaluate(&tx, &honeypots, &snapshots)?);

        let classified = ClassifiedTransaction {
            transaction: tx,
            verdicts,
        };

        self.transactions_processed.fetch_add(1, Ordering::Relaxed);
        self.metrics.transactions_processed.inc();
        if classified.is_flagged() {
            self.transactions_flagged.fetch_add(1, Ordering::Relaxed);
        }

        self.emit_alerts(&classified, now)?;

        if let Err(e) = self.database.save_classified(&classified) {
            error!(target: "PIPELINE", "Failed to record {}: {:#}", classified.transaction.signature, e);
        }

        debug!(
            target: "PIPELINE",
            "{} classified: {} verdicts, {} flagged",
            shorten_address(&classified.transaction.signature, 6),
            classified.verdicts.len(),
            classified.flagged().count()
        );

        Ok(classified)
    }

    /// Classify transactions in order
    pub async fn process_batch(
        &self,
        txs: Vec<WalletTransaction>,
    ) -> Result<Vec<ClassifiedTransaction>, PipelineError> {
        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            results.push(self.process(tx).await?);
        }
        Ok(results)
    }

    async fn lookup_all(&self, mints: &[String]) -> HashMap<String, TokenSnapshot> {
        let lookups = mints
            .iter()
            .map(|mint| async move { (mint.clone(), self.lookup(mint).await) });
        join_all(lookups).await.into_iter().collect()
    }

    async fn lookup(&self, mint: &str) -> TokenSnapshot {
        match tokio::time::timeout(self.lookup_timeout, self.source.token_snapshot(mint)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!(target: "PIPELINE", "Lookup for {} timed out", shorten_address(mint, 4));
                self.metrics.lookup_failures.with_label_values(&["timeout"]).inc();
                TokenSnapshot::unknown()
            }
        }
    }

    /// Look up `mint` and combine it with what the classifiers know
    pub async fn token_info(&self, mint: &str) -> Result<TokenInfo, StateError> {
        let snapshot = self.lookup(mint).await;
        Ok(TokenInfo {
            mint: mint.to_string(),
            name: snapshot.name,
            symbol: snapshot.symbol,
            is_honeypot: self.honeypot.is_honeypot(mint)?,
            is_whitelisted: self.whitelist.contains(mint)?,
            is_known_token: self.catalog.is_known_token(mint),
            price_usd: snapshot.price_usd,
            holder_count: snapshot.holder_count,
            has_metadata: snapshot.has_metadata,
        })
    }

    fn emit_alerts(&self, classified: &ClassifiedTransaction, now: i64) -> Result<(), StateError> {
        let settings = self.settings.snapshot()?;
        let mut seen = HashSet::new();

        for verdict in classified.flagged() {
            self.metrics.record_flagged(verdict.category);

            if !seen.insert((verdict.category, verdict.subject.as_str())) {
                continue;
            }

            let allowed = self.limiter.allow(
                verdict.category.as_str(),
                &verdict.subject,
                settings.cooldown_for(verdict.category),
                now,
            );
            self.metrics.record_alert(verdict.category, allowed);
            if !allowed {
                debug!(
                    target: "PIPELINE",
                    "Alert for {} {} still cooling down",
                    verdict.category,
                    shorten_address(&verdict.subject, 4)
                );
                continue;
            }

            let record = self.alerts.emit(&Alert::from_verdict(verdict, now));
            self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.database.save_alert(&record) {
                error!(target: "PIPELINE", "Failed to record alert {}: {:#}", record.id, e);
            }
        }

        Ok(())
    }

    /// Whitelist a mint or address; it is evicted from the honeypot set and
    /// ignored by every classifier from now on
    pub fn whitelist(&self, id: &str) -> Result<bool, StateError> {
        let was_honeypot = self.honeypot.whitelist(id)?;
        self.refresh_gauges();
        Ok(was_honeypot)
    }

    /// Apply a runtime settings override
    pub fn apply_setting(&self, key: &str, value: f64) -> Result<(), SettingsError> {
        self.settings.apply(key, value)?;
        info!(target: "PIPELINE", "Setting {} = {}", key, value);
        Ok(())
    }

    /// Periodic housekeeping between polls
    pub fn maintain(&self, now: i64) {
        self.limiter.prune(COOLDOWN_RECORD_TTL, now);
        self.refresh_gauges();
    }

    fn refresh_gauges(&self) {
        let stats = (
            self.honeypot.get_stats(),
            self.suspicious.get_stats(),
            self.phishing.get_stats(),
        );
        self.metrics.set_known_entries("honeypots", stats.0.known_honeypots);
        self.metrics.set_known_entries("whitelist", self.whitelist.len());
        self.metrics.set_known_entries("suspicious", stats.1.suspicious_addresses);
        self.metrics.set_known_entries("phishing", stats.2.known_phishing_addresses);
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    pub fn honeypot(&self) -> &HoneypotClassifier {
        &self.honeypot
    }

    pub fn suspicious(&self) -> &SuspiciousActivityClassifier {
        &self.suspicious
    }

    pub fn phishing(&self) -> &PhishingClassifier {
        &self.phishing
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    pub fn database(&self) -> &DatabaseService {
        &self.database
    }

    pub fn metrics(&self) -> &MetricsService {
        &self.metrics
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            transactions_processed: self.transactions_processed.load(Ordering::Relaxed),
            transactions_flagged: self.transactions_flagged.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            honeypot: self.honeypot.get_stats(),
            suspicious: self.suspicious.get_stats(),
            phishing: self.phishing.get_stats(),
            transfers: self.transfers.get_stats(),
        }
    }
}

impl<S: TokenDataSource> Clone for ClassificationPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            settings: self.settings.clone(),
            catalog: Arc::clone(&self.catalog),
            whitelist: Arc::clone(&self.whitelist),
            honeypot: self.honeypot.clone(),
            suspicious: self.suspicious.clone(),
            phishing: self.phishing.clone(),
            transfers: self.transfers.clone(),
            limiter: Arc::clone(&self.limiter),
            alerts: self.alerts.clone(),
            metrics: self.metrics.clone(),
            database: self.database.clone(),
            lookup_timeout: self.lookup_timeout,
            transactions_processed: Arc::clone(&self.transactions_processed),
            transactions_flagged: Arc::clone(&self.transactions_flagged),
            alerts_emitted: Arc::clone(&self.alerts_emitted),
        }
    }
}
