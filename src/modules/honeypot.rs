//! Honeypot Token Classifier - scores mints from price, metadata, holders and velocity

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ClassifierSettings, ProgramCatalog, SharedSettings, HONEYPOT_RETENTION};
use crate::error::StateError;
use crate::lookup::TokenSnapshot;
use crate::types::{shorten_address, Category, ClassificationVerdict};
use crate::utils::{PersistentSet, WindowedAggregator};

/// Independent honeypot signals and their fixed weights.
///
/// The four weights sum to exactly 1.0. Confidence is the plain sum of the
/// triggered weights and is not clamped, so adding a signal
/// without renormalizing can push it above 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoneypotSignal {
    ZeroPrice,
    MissingMetadata,
    FewHolders,
    HighVelocity,
}

impl HoneypotSignal {
    pub fn weight(&self) -> f64 {
        match self {
            HoneypotSignal::ZeroPrice => 0.30,
            HoneypotSignal::MissingMetadata => 0.20,
            HoneypotSignal::FewHolders => 0.25,
            HoneypotSignal::HighVelocity => 0.25,
        }
    }

    fn describe(&self, settings: &ClassifierSettings) -> String {
        match self {
            HoneypotSignal::ZeroPrice => "Token has zero price".to_string(),
            HoneypotSignal::MissingMetadata => "Missing on-chain metadata".to_string(),
            HoneypotSignal::FewHolders => format!(
                "Few token holders (<{})",
                settings.honeypot_holders_threshold
            ),
            HoneypotSignal::HighVelocity => format!(
                "High transaction velocity (>= {} txs in {}s)",
                settings.honeypot_velocity_count, settings.honeypot_velocity_window
            ),
        }
    }
}

/// Honeypot classifier statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneypotStats {
    pub tokens_evaluated: u64,
    pub honeypots_detected: u64,
    pub known_honeypots: usize,
    pub whitelisted: usize,
    pub tracked_mints: usize,
}

/// Honeypot Token Classifier
pub struct HoneypotClassifier {
    settings: SharedSettings,
    catalog: Arc<ProgramCatalog>,
    honeypots: Arc<PersistentSet>,
    whitelist: Arc<PersistentSet>,
    velocity: Arc<WindowedAggregator<()>>,

    tokens_evaluated: Arc<AtomicU64>,
    honeypots_detected: Arc<AtomicU64>,
}

impl HoneypotClassifier {
    pub fn new(
        settings: SharedSettings,
        catalog: Arc<ProgramCatalog>,
        honeypots: Arc<PersistentSet>,
        whitelist: Arc<PersistentSet>,
    ) -> Self {
        Self {
            settings,
            catalog,
            honeypots,
            whitelist,
            velocity: Arc::new(WindowedAggregator::new(HONEYPOT_RETENTION)),
            tokens_evaluated: Arc::new(AtomicU64::new(0)),
            honeypots_detected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one transfer of `mint` for the velocity signal
    pub fn track(&self, mint: &str, timestamp: i64) {
        self.velocity.record(mint, (), timestamp);
    }

    /// Classify `mint` using the pre-fetched `snapshot`
    pub fn evaluate(
        &self,
        mint: &str,
        snapshot: &TokenSnapshot,
        now: i64,
    ) -> Result<ClassificationVerdict, StateError> {
        self.tokens_evaluated.fetch_add(1, Ordering::Relaxed);

        if self.whitelist.contains(mint)? {
            return Ok(ClassificationVerdict::clear(
                Category::Honeypot,
                mint,
                0.0,
                vec!["Token is whitelisted".to_string()],
            ));
        }

        if self.honeypots.contains(mint)? {
            return Ok(ClassificationVerdict::flagged(
                Category::Honeypot,
                mint,
                1.0,
                vec!["Token is a known honeypot".to_string()],
            ));
        }

        if self.catalog.is_known_token(mint) {
            return Ok(ClassificationVerdict::clear(
                Category::Honeypot,
                mint,
                0.0,
                vec!["Well-known token".to_string()],
            ));
        }

        let settings = self.settings.snapshot()?;
        let signals = self.signals(mint, snapshot, &settings, now);
        let confidence: f64 = signals.iter().map(HoneypotSignal::weight).sum();
        let reasons: Vec<String> = signals.iter().map(|s| s.describe(&settings)).collect();

        if confidence >= settings.honeypot_confidence_threshold {
            if self.honeypots.add(mint)? {
                // A whitelist that landed after the check above wins
                if self.whitelist.contains(mint)? {
                    self.honeypots.remove(mint)?;
                    return Ok(ClassificationVerdict::clear(
                        Category::Honeypot,
                        mint,
                        0.0,
                        vec!["Token is whitelisted".to_string()],
                    ));
                }
                self.honeypots_detected.fetch_add(1, Ordering::Relaxed);
            }
            crate::log_honeypot!(
                "{} flagged as honeypot ({:.2}): {}",
                shorten_address(mint, 4),
                confidence,
                reasons.join("; ")
            );
            return Ok(ClassificationVerdict::flagged(
                Category::Honeypot,
                mint,
                confidence,
                reasons,
            ));
        }

        debug!(target: "HONEYPOT", "{} below threshold ({:.2})", shorten_address(mint, 4), confidence);
        Ok(ClassificationVerdict::clear(
            Category::Honeypot,
            mint,
            confidence,
            reasons,
        ))
    }

    fn signals(
        &self,
        mint: &str,
        snapshot: &TokenSnapshot,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<HoneypotSignal> {
        let mut signals = Vec::new();

        if snapshot.price_usd == Some(0.0) {
            signals.push(HoneypotSignal::ZeroPrice);
        }

        if snapshot.has_metadata == Some(false) {
            signals.push(HoneypotSignal::MissingMetadata);
        }

        if let Some(holders) = snapshot.holder_count {
            if (holders as f64) < settings.honeypot_holders_threshold {
                signals.push(HoneypotSignal::FewHolders);
            }
        }

        let recent = self
            .velocity
            .count(mint, settings.honeypot_velocity_window, now);
        if recent as f64 >= settings.honeypot_velocity_count {
            signals.push(HoneypotSignal::HighVelocity);
        }

        signals
    }

    /// Whitelist a mint or address. Evicts it from the honeypot set.
    ///
    /// Returns true when the id was previously a known honeypot.
    pub fn whitelist(&self, id: &str) -> Result<bool, StateError> {
        self.whitelist.add(id)?;
        let was_honeypot = self.honeypots.remove(id)?;

        info!(
            target: "HONEYPOT",
            "Whitelisted {}{}",
            shorten_address(id, 4),
            if was_honeypot { " (removed from honeypots)" } else { "" }
        );
        Ok(was_honeypot)
    }

    pub fn is_honeypot(&self, mint: &str) -> Result<bool, StateError> {
        if self.whitelist.contains(mint)? {
            return Ok(false);
        }
        self.honeypots.contains(mint)
    }

    pub fn known_honeypots(&self) -> Result<BTreeSet<String>, StateError> {
        self.honeypots.snapshot()
    }

    pub fn whitelisted(&self) -> Result<BTreeSet<String>, StateError> {
        self.whitelist.snapshot()
    }

    pub fn get_stats(&self) -> HoneypotStats {
        HoneypotStats {
            tokens_evaluated: self.tokens_evaluated.load(Ordering::Relaxed),
            honeypots_detected: self.honeypots_detected.load(Ordering::Relaxed),
            known_honeypots: self.honeypots.len(),
            whitelisted: self.whitelist.len(),
            tracked_mints: self.velocity.tracked_keys(),
        }
    }
}

impl Clone for HoneypotClassifier {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            catalog: Arc::clone(&self.catalog),
            honeypots: Arc::clone(&self.honeypots),
            whitelist: Arc::clone(&self.whitelist),
            velocity: Arc::clone(&self.velocity),
            tokens_evaluated: Arc::clone(&self.tokens_evaluated),
            honeypots_detected: Arc::clone(&self.honeypots_detected),
        }
    }
}
