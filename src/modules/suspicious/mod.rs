//! Suspicious Activity Classifier - windowed per-address aggregates plus
//! side-effect sub-detectors

mod detectors;

pub use detectors::{behavior_key, BridgeActivity, Promotion, SubDetectors, TokenState, WalletGroup};

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::{
    ClassifierSettings, ProgramCatalog, SharedSettings, LOCK_TIMEOUT, SUSPICIOUS_RETENTION_CEILING,
};
use crate::error::StateError;
use crate::lookup::TokenSnapshot;
use crate::types::{shorten_address, Category, ClassificationVerdict, EventKind, WalletTransaction};
use crate::utils::{PersistentSet, WindowedAggregator};

/// Number of recent promotions kept for the dashboard
const ALERT_BUFFER: usize = 20;

/// What one transaction contributed to one counterpart's window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityObservation {
    pub sol_amount: f64,
    pub usd_amount: f64,
    pub instruction_count: usize,
    pub program_ids: BTreeSet<String>,
}

/// Aggregate rules, in the order they are checked. The first match wins.
#[derive(Debug, Clone, PartialEq)]
pub enum SuspicionRule {
    Velocity { in_horizon: usize, in_rapid_window: usize },
    SolVolume(f64),
    UsdVolume(f64),
    ProgramDiversity(usize),
}

impl SuspicionRule {
    pub fn confidence(&self) -> f64 {
        match self {
            SuspicionRule::Velocity { .. } => 0.8,
            SuspicionRule::SolVolume(_) => 0.7,
            SuspicionRule::UsdVolume(_) => 0.7,
            SuspicionRule::ProgramDiversity(_) => 0.6,
        }
    }

    fn describe(&self, settings: &ClassifierSettings) -> String {
        match self {
            SuspicionRule::Velocity { in_rapid_window, .. } => format!(
                "High transaction velocity: {} transactions in {}s",
                in_rapid_window, settings.rapid_window
            ),
            SuspicionRule::SolVolume(sol) => format!(
                "Large SOL volume: {:.2} SOL in {}s",
                sol, settings.suspicious_horizon
            ),
            SuspicionRule::UsdVolume(usd) => format!(
                "High value transfers: ${:.2} in {}s",
                usd, settings.suspicious_horizon
            ),
            SuspicionRule::ProgramDiversity(n) => {
                format!("Interacted with {} unusual programs", n)
            }
        }
    }
}

/// Entry in the recent-promotions ring buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousAlert {
    pub address: String,
    pub category: Category,
    pub reason: String,
    pub timestamp: i64,
    pub time: String,
}

/// Primary verdict plus any addresses promoted by sub-detectors
#[derive(Debug, Clone)]
pub struct SuspiciousReport {
    pub verdict: ClassificationVerdict,
    pub promotions: Vec<ClassificationVerdict>,
}

impl SuspiciousReport {
    /// All verdicts, primary first
    pub fn into_verdicts(self) -> Vec<ClassificationVerdict> {
        let mut verdicts = Vec::with_capacity(self.promotions.len() + 1);
        verdicts.push(self.verdict);
        verdicts.extend(self.promotions);
        verdicts
    }
}

/// Suspicious activity statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousStats {
    pub transactions_analyzed: u64,
    pub addresses_flagged: u64,
    pub suspicious_addresses: usize,
    pub tracked_addresses: usize,
    pub tracked_tokens: usize,
    pub wallet_groups: usize,
    pub unsellable_tokens: usize,
}

/// Suspicious Activity Classifier
pub struct SuspiciousActivityClassifier {
    settings: SharedSettings,
    catalog: Arc<ProgramCatalog>,
    suspicious: Arc<PersistentSet>,
    whitelist: Arc<PersistentSet>,
    activity: Arc<WindowedAggregator<ActivityObservation>>,
    detectors: Arc<SubDetectors>,
    recent_alerts: Arc<RwLock<VecDeque<SuspiciousAlert>>>,

    transactions_analyzed: Arc<AtomicU64>,
    addresses_flagged: Arc<AtomicU64>,
}

impl SuspiciousActivityClassifier {
    pub fn new(
        settings: SharedSettings,
        catalog: Arc<ProgramCatalog>,
        suspicious: Arc<PersistentSet>,
        whitelist: Arc<PersistentSet>,
    ) -> Self {
        Self {
            settings,
            detectors: Arc::new(SubDetectors::new(Arc::clone(&catalog))),
            catalog,
            suspicious,
            whitelist,
            activity: Arc::new(WindowedAggregator::new(SUSPICIOUS_RETENTION_CEILING)),
            recent_alerts: Arc::new(RwLock::new(VecDeque::with_capacity(ALERT_BUFFER))),
            transactions_analyzed: Arc::new(AtomicU64::new(0)),
            addresses_flagged: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Classify one transaction.
    ///
    /// The primary verdict is computed before the sub-detectors run, so a
    /// promotion made by this transaction shows up in `promotions` rather
    /// than as a known-address hit. `snapshots` holds the pre-fetched facts
    /// for every mint in `tx`; prices missing from it contribute nothing to
    /// USD volume.
    pub fn evaluate(
        &self,
        tx: &WalletTransaction,
        snapshots: &HashMap<String, TokenSnapshot>,
        now: i64,
    ) -> Result<SuspiciousReport, StateError> {
        self.transactions_analyzed.fetch_add(1, Ordering::Relaxed);
        let settings = self.settings.snapshot()?;

        let verdict = self.primary_verdict(tx, snapshots, &settings, now)?;

        let mut promotions = Vec::new();
        for promotion in self.detectors.observe(tx, snapshots, &settings, now) {
            if self.promote(&promotion.address, promotion.category, &promotion.reason, now)? {
                promotions.push(ClassificationVerdict::flagged(
                    promotion.category,
                    &promotion.address,
                    promotion.confidence,
                    vec![promotion.reason],
                ));
            }
        }

        Ok(SuspiciousReport { verdict, promotions })
    }

    fn primary_verdict(
        &self,
        tx: &WalletTransaction,
        snapshots: &HashMap<String, TokenSnapshot>,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Result<ClassificationVerdict, StateError> {
        let mut counterparts = Vec::new();
        for address in tx.counterparts() {
            if !self.whitelist.contains(&address)? {
                counterparts.push(address);
            }
        }

        for address in &counterparts {
            if self.suspicious.contains(address)? {
                return Ok(ClassificationVerdict::flagged(
                    Category::SuspiciousActivity,
                    address,
                    1.0,
                    vec!["Address is a known suspicious address".to_string()],
                ));
            }
        }

        for address in &counterparts {
            let observation = self.observation_for(tx, address, snapshots);
            self.activity.record(address, observation, now);
        }

        for address in &counterparts {
            if let Some(rule) = self.analyze(address, settings, now) {
                let reason = rule.describe(settings);
                self.promote(address, Category::SuspiciousActivity, &reason, now)?;
                return Ok(ClassificationVerdict::flagged(
                    Category::SuspiciousActivity,
                    address,
                    rule.confidence(),
                    vec![reason],
                ));
            }
        }

        let subject = counterparts
            .first()
            .cloned()
            .or_else(|| tx.account.clone())
            .unwrap_or_else(|| tx.signature.clone());
        Ok(ClassificationVerdict::clear(
            Category::SuspiciousActivity,
            &subject,
            0.0,
            Vec::new(),
        ))
    }

    fn observation_for(
        &self,
        tx: &WalletTransaction,
        address: &str,
        snapshots: &HashMap<String, TokenSnapshot>,
    ) -> ActivityObservation {
        let mut observation = ActivityObservation {
            instruction_count: tx.program_ids.len(),
            program_ids: tx.program_ids.iter().cloned().collect(),
            ..Default::default()
        };

        for event in tx
            .events
            .iter()
            .filter(|e| e.counterpart.as_deref() == Some(address))
        {
            match event.kind {
                EventKind::SolTransfer => observation.sol_amount += event.amount,
                EventKind::TokenTransfer => {
                    let price = event
                        .mint
                        .as_ref()
                        .and_then(|m| snapshots.get(m))
                        .and_then(|s| s.price_usd);
                    if let Some(price) = price {
                        observation.usd_amount += event.amount * price;
                    }
                }
                EventKind::TokenApproval | EventKind::MintTo => {}
            }
        }

        observation
    }

    /// Check the aggregate rules for one address over its current window
    pub fn analyze(&self, address: &str, settings: &ClassifierSettings, now: i64) -> Option<SuspicionRule> {
        let recent = self.activity.window(address, settings.suspicious_horizon, now);
        if recent.is_empty() {
            return None;
        }

        if recent.len() as f64 >= settings.rapid_transactions {
            let rapid_start = now - settings.rapid_window;
            let in_rapid_window = recent.iter().filter(|e| e.timestamp >= rapid_start).count();
            if in_rapid_window as f64 >= settings.rapid_transactions {
                return Some(SuspicionRule::Velocity {
                    in_horizon: recent.len(),
                    in_rapid_window,
                });
            }
        }

        let sol: f64 = recent.iter().map(|e| e.observation.sol_amount).sum();
        if sol >= settings.large_sol_volume {
            return Some(SuspicionRule::SolVolume(sol));
        }

        let usd: f64 = recent.iter().map(|e| e.observation.usd_amount).sum();
        if usd >= settings.high_value_usd {
            return Some(SuspicionRule::UsdVolume(usd));
        }

        let unusual: BTreeSet<&String> = recent
            .iter()
            .flat_map(|e| e.observation.program_ids.iter())
            .filter(|p| self.catalog.unusual_programs.contains(p))
            .collect();
        if unusual.len() as f64 >= settings.unusual_program_count {
            return Some(SuspicionRule::ProgramDiversity(unusual.len()));
        }

        None
    }

    /// Add `address` to the suspicious set with a reason.
    ///
    /// Whitelisted addresses are ignored. Returns true when the address was
    /// newly added, in which case it is also appended to the recent alerts.
    pub fn add_suspicious_address(&self, address: &str, reason: &str, now: i64) -> Result<bool, StateError> {
        self.promote(address, Category::SuspiciousActivity, reason, now)
    }

    fn promote(&self, address: &str, category: Category, reason: &str, now: i64) -> Result<bool, StateError> {
        if self.whitelist.contains(address)? {
            debug!(target: "SUSPICIOUS", "Skipping whitelisted {}", shorten_address(address, 4));
            return Ok(false);
        }

        if !self.suspicious.add(address)? {
            return Ok(false);
        }

        self.addresses_flagged.fetch_add(1, Ordering::Relaxed);
        crate::log_suspicious!(
            "[{}] {} - {}",
            category.as_str(),
            shorten_address(address, 4),
            reason
        );

        let time = Utc
            .timestamp_opt(now, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        let mut alerts = self
            .recent_alerts
            .try_write_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::write("suspicious alerts"))?;
        alerts.push_front(SuspiciousAlert {
            address: address.to_string(),
            category,
            reason: reason.to_string(),
            timestamp: now,
            time,
        });
        alerts.truncate(ALERT_BUFFER);

        Ok(true)
    }

    pub fn is_suspicious(&self, address: &str) -> Result<bool, StateError> {
        if self.whitelist.contains(address)? {
            return Ok(false);
        }
        self.suspicious.contains(address)
    }

    pub fn suspicious_addresses(&self) -> Result<BTreeSet<String>, StateError> {
        self.suspicious.snapshot()
    }

    /// Most recent promotions, newest first
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<SuspiciousAlert>, StateError> {
        let alerts = self
            .recent_alerts
            .try_read_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::read("suspicious alerts"))?;
        Ok(alerts.iter().take(limit).cloned().collect())
    }

    pub fn unsellable_mints(&self) -> Vec<(String, i64)> {
        self.detectors.unsellable_mints()
    }

    pub fn wallet_groups(&self) -> Vec<WalletGroup> {
        self.detectors.wallet_groups()
    }

    pub fn get_stats(&self) -> SuspiciousStats {
        SuspiciousStats {
            transactions_analyzed: self.transactions_analyzed.load(Ordering::Relaxed),
            addresses_flagged: self.addresses_flagged.load(Ordering::Relaxed),
            suspicious_addresses: self.suspicious.len(),
            tracked_addresses: self.activity.tracked_keys(),
            tracked_tokens: self.detectors.tracked_tokens(),
            wallet_groups: self.detectors.group_count(),
            unsellable_tokens: self.detectors.unsellable_mints().len(),
        }
    }
}

impl Clone for SuspiciousActivityClassifier {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            catalog: Arc::clone(&self.catalog),
            suspicious: Arc::clone(&self.suspicious),
            whitelist: Arc::clone(&self.whitelist),
            activity: Arc::clone(&self.activity),
            detectors: Arc::clone(&self.detectors),
            recent_alerts: Arc::clone(&self.recent_alerts),
            transactions_analyzed: Arc::clone(&self.transactions_analyzed),
            addresses_flagged: Arc::clone(&self.addresses_flagged),
        }
    }
}
