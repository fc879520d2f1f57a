//! Phishing Classifier - memo domain typosquats and approval/drain sequences

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::{ClassifierSettings, SharedSettings, LOCK_TIMEOUT};
use crate::error::StateError;
use crate::lookup::TokenSnapshot;
use crate::types::{shorten_address, Category, ClassificationVerdict, EventKind, WalletTransaction};
use crate::utils::PersistentSet;

/// Upper bound on tracked addresses and tracked domains
const MAX_TRACKED: usize = 1000;

const ALERT_BUFFER: usize = 50;

const URL_PATTERN: &str = r"(?i)https?://((?:[-\w.]|%[0-9a-fA-F]{2})+)";

/// (pattern, tld prefix that makes a match legitimate)
const DOMAIN_PATTERNS: [(&str, Option<&str>); 9] = [
    (r"solana?-?claim", None),
    (r"phantom-?wallet\.([a-z0-9.-]*)", Some("io")),
    (r"free-?sol", None),
    (r"solana-?drop", None),
    (r"solscan\.([a-z0-9.-]*)", Some("io")),
    (r"airdrop-?solana", None),
    (r"solana-?nft-?mint", None),
    (r"solana-?gift", None),
    (r"wallet-?connect\.([a-z0-9.-]*)", Some("org")),
];

/// Typosquat rule. A match whose captured suffix starts with `legit_tld` is
/// the real brand and does not count.
#[derive(Debug, Clone)]
struct DomainRule {
    pattern: Regex,
    legit_tld: Option<&'static str>,
}

impl DomainRule {
    fn matches(&self, domain: &str) -> bool {
        match self.legit_tld {
            None => self.pattern.is_match(domain),
            Some(tld) => self.pattern.captures_iter(domain).any(|caps| {
                caps.get(1)
                    .map_or(true, |suffix| !suffix.as_str().starts_with(tld))
            }),
        }
    }
}

/// Pattern kinds remembered per address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    PhishingUrl,
    NearTotalSolDrain,
    TokenApproval,
    ApprovalThenTransfer,
    MultipleTokenTransfersOut,
}

/// One triggered phishing indicator
#[derive(Debug, Clone, PartialEq)]
pub enum PhishingIndicator {
    PhishingUrl(String),
    NearTotalSolDrain { remaining: f64 },
    TokenApproval,
    /// An approval seen in an earlier transaction, credited when it is followed by a drain
    PriorApproval,
    ApprovalThenTransfer,
    MultipleTokenTransfersOut(usize),
}

impl PhishingIndicator {
    pub fn weight(&self) -> f64 {
        match self {
            PhishingIndicator::PhishingUrl(_) => 0.9,
            PhishingIndicator::NearTotalSolDrain { .. } => 0.7,
            PhishingIndicator::TokenApproval => 0.3,
            PhishingIndicator::PriorApproval => 0.3,
            PhishingIndicator::ApprovalThenTransfer => 0.6,
            PhishingIndicator::MultipleTokenTransfersOut(_) => 0.5,
        }
    }

    fn kind(&self) -> PatternKind {
        match self {
            PhishingIndicator::PhishingUrl(_) => PatternKind::PhishingUrl,
            PhishingIndicator::NearTotalSolDrain { .. } => PatternKind::NearTotalSolDrain,
            PhishingIndicator::TokenApproval | PhishingIndicator::PriorApproval => PatternKind::TokenApproval,
            PhishingIndicator::ApprovalThenTransfer => PatternKind::ApprovalThenTransfer,
            PhishingIndicator::MultipleTokenTransfersOut(_) => PatternKind::MultipleTokenTransfersOut,
        }
    }

    fn describe(&self) -> String {
        match self {
            PhishingIndicator::PhishingUrl(domain) => {
                format!("Transaction contains link to suspected phishing domain: {}", domain)
            }
            PhishingIndicator::NearTotalSolDrain { remaining } => {
                format!("Near-total SOL drain, {:.6} SOL left", remaining)
            }
            PhishingIndicator::TokenApproval => "Token approval granted".to_string(),
            PhishingIndicator::PriorApproval => "Token approval granted earlier".to_string(),
            PhishingIndicator::ApprovalThenTransfer => {
                "Tokens transferred out after a recent approval".to_string()
            }
            PhishingIndicator::MultipleTokenTransfersOut(n) => {
                format!("{} outgoing token transfers in one transaction", n)
            }
        }
    }
}

/// Pattern history of one address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAddress {
    pub first_seen: i64,
    pub last_updated: i64,
    pub patterns: VecDeque<(i64, PatternKind)>,
}

impl TrackedAddress {
    fn prune(&mut self, cutoff: i64) {
        while self.patterns.front().map_or(false, |(t, _)| *t < cutoff) {
            self.patterns.pop_front();
        }
    }

    fn has_recent(&self, kind: PatternKind, cutoff: i64) -> bool {
        self.patterns.iter().any(|(t, k)| *k == kind && *t >= cutoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedDomain {
    pub domain: String,
    pub first_seen: i64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhishingAlert {
    pub address: String,
    pub reason: String,
    pub timestamp: i64,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhishingStats {
    pub transactions_analyzed: u64,
    pub phishing_detected: u64,
    pub known_phishing_addresses: usize,
    pub tracked_addresses: usize,
    pub tracked_domains: usize,
}

/// Phishing Classifier
pub struct PhishingClassifier {
    settings: SharedSettings,
    phishing: Arc<PersistentSet>,
    whitelist: Arc<PersistentSet>,
    url_pattern: Regex,
    domain_rules: Arc<Vec<DomainRule>>,
    tracked_addresses: Arc<DashMap<String, TrackedAddress>>,
    tracked_domains: Arc<DashMap<String, TrackedDomain>>,
    recent_alerts: Arc<RwLock<VecDeque<PhishingAlert>>>,

    transactions_analyzed: Arc<AtomicU64>,
    phishing_detected: Arc<AtomicU64>,
}

impl PhishingClassifier {
    pub fn new(
        settings: SharedSettings,
        phishing: Arc<PersistentSet>,
        whitelist: Arc<PersistentSet>,
    ) -> Result<Self> {
        let url_pattern = Regex::new(URL_PATTERN).context("compiling URL pattern")?;
        let domain_rules = DOMAIN_PATTERNS
            .iter()
            .map(|(pattern, legit_tld)| {
                Ok(DomainRule {
                    pattern: Regex::new(&format!("(?i){}", pattern))
                        .with_context(|| format!("compiling domain pattern {}", pattern))?,
                    legit_tld: *legit_tld,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            settings,
            phishing,
            whitelist,
            url_pattern,
            domain_rules: Arc::new(domain_rules),
            tracked_addresses: Arc::new(DashMap::new()),
            tracked_domains: Arc::new(DashMap::new()),
            recent_alerts: Arc::new(RwLock::new(VecDeque::with_capacity(ALERT_BUFFER))),
            transactions_analyzed: Arc::new(AtomicU64::new(0)),
            phishing_detected: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The address a phishing verdict is about
    pub fn subject_of(tx: &WalletTransaction) -> String {
        tx.events
            .iter()
            .filter(|e| e.is_outgoing())
            .find_map(|e| e.counterpart.clone())
            .or_else(|| tx.counterparts().into_iter().next())
            .or_else(|| tx.account.clone())
            .unwrap_or_else(|| tx.signature.clone())
    }

    pub fn evaluate(&self, tx: &WalletTransaction, now: i64) -> Result<ClassificationVerdict, StateError> {
        self.transactions_analyzed.fetch_add(1, Ordering::Relaxed);
        let subject = Self::subject_of(tx);

        if self.whitelist.contains(&subject)? {
            return Ok(ClassificationVerdict::clear(
                Category::Phishing,
                &subject,
                0.0,
                vec!["Address is whitelisted".to_string()],
            ));
        }

        if self.phishing.contains(&subject)? {
            return Ok(ClassificationVerdict::flagged(
                Category::Phishing,
                &subject,
                1.0,
                vec!["Address is a known phishing address".to_string()],
            ));
        }

        let settings = self.settings.snapshot()?;

        let indicators = match tx.memo.as_deref().and_then(|memo| self.check_memo(memo, now)) {
            Some(domain) => vec![PhishingIndicator::PhishingUrl(domain)],
            None => self.transaction_indicators(tx, &subject, &settings, now),
        };

        self.track_address_patterns(&subject, &indicators, &settings, now);

        let confidence: f64 = indicators.iter().map(PhishingIndicator::weight).sum();
        let reasons: Vec<String> = indicators.iter().map(PhishingIndicator::describe).collect();

        if indicators.is_empty() || confidence < settings.phishing_confidence_threshold {
            return Ok(ClassificationVerdict::clear(
                Category::Phishing,
                &subject,
                confidence,
                reasons,
            ));
        }

        self.phishing_detected.fetch_add(1, Ordering::Relaxed);
        crate::log_phishing!(
            "{} scored {:.2}: {}",
            shorten_address(&subject, 4),
            confidence,
            reasons.join("; ")
        );

        if confidence > settings.phishing_promotion_threshold {
            let kinds: Vec<&str> = indicators.iter().map(|i| i.kind().as_str()).collect();
            let reason = format!("Suspected phishing pattern: {}", kinds.join(", "));
            self.add_phishing_address(&subject, &reason, now)?;
        }

        Ok(ClassificationVerdict::flagged(
            Category::Phishing,
            &subject,
            confidence,
            reasons,
        ))
    }

    fn transaction_indicators(
        &self,
        tx: &WalletTransaction,
        subject: &str,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<PhishingIndicator> {
        let mut indicators = Vec::new();

        let sends_sol = tx
            .events
            .iter()
            .any(|e| e.kind == EventKind::SolTransfer && e.is_outgoing() && e.amount > 0.0);
        if let Some(remaining) = tx.sol_balance_after {
            if sends_sol && remaining > 0.0 && remaining < settings.phishing_dust_threshold {
                indicators.push(PhishingIndicator::NearTotalSolDrain { remaining });
            }
        }

        let approves = tx.has_kind(EventKind::TokenApproval);
        if approves {
            indicators.push(PhishingIndicator::TokenApproval);
        }

        let outgoing_tokens = tx.outgoing_token_transfers();
        if outgoing_tokens > 0 {
            let cutoff = now - settings.phishing_pattern_retention;
            let approved_before = self
                .tracked_addresses
                .get(subject)
                .map_or(false, |t| t.has_recent(PatternKind::TokenApproval, cutoff));
            if approved_before {
                if !approves {
                    indicators.push(PhishingIndicator::PriorApproval);
                }
                indicators.push(PhishingIndicator::ApprovalThenTransfer);
            }
        }

        if outgoing_tokens > 3 {
            indicators.push(PhishingIndicator::MultipleTokenTransfersOut(outgoing_tokens));
        }

        indicators
    }

    /// Extract memo URLs, track their domains and return the first that
    /// matches a typosquat rule
    pub fn check_memo(&self, memo: &str, now: i64) -> Option<String> {
        for caps in self.url_pattern.captures_iter(memo) {
            let Some(host) = caps.get(1) else { continue };
            let domain = host.as_str().to_lowercase();
            self.track_domain(&domain, now);

            if self.domain_rules.iter().any(|rule| rule.matches(&domain)) {
                debug!(target: "PHISHING", "Memo links to {}", domain);
                return Some(domain);
            }
        }
        None
    }

    fn track_domain(&self, domain: &str, now: i64) {
        if let Some(mut tracked) = self.tracked_domains.get_mut(domain) {
            tracked.count += 1;
            return;
        }

        if self.tracked_domains.len() >= MAX_TRACKED {
            let oldest = self
                .tracked_domains
                .iter()
                .min_by_key(|e| e.first_seen)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.tracked_domains.remove(&oldest);
            }
        }

        self.tracked_domains.insert(
            domain.to_string(),
            TrackedDomain {
                domain: domain.to_string(),
                first_seen: now,
                count: 1,
            },
        );
    }

    fn track_address_patterns(
        &self,
        address: &str,
        indicators: &[PhishingIndicator],
        settings: &ClassifierSettings,
        now: i64,
    ) {
        // Prior approvals are already on record
        let kinds: Vec<PatternKind> = indicators
            .iter()
            .filter(|i| **i != PhishingIndicator::PriorApproval)
            .map(PhishingIndicator::kind)
            .collect();
        if kinds.is_empty() {
            return;
        }

        if !self.tracked_addresses.contains_key(address) && self.tracked_addresses.len() >= MAX_TRACKED {
            let oldest = self
                .tracked_addresses
                .iter()
                .min_by_key(|e| e.first_seen)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.tracked_addresses.remove(&oldest);
            }
        }

        let mut tracked = self
            .tracked_addresses
            .entry(address.to_string())
            .or_insert_with(|| TrackedAddress {
                first_seen: now,
                last_updated: now,
                patterns: VecDeque::new(),
            });
        tracked.prune(now - settings.phishing_pattern_retention);
        tracked.patterns.extend(kinds.into_iter().map(|k| (now, k)));
        tracked.last_updated = now;
    }

    /// Add `address` to the phishing set. Returns true when newly added.
    pub fn add_phishing_address(&self, address: &str, reason: &str, now: i64) -> Result<bool, StateError> {
        if self.whitelist.contains(address)? {
            return Ok(false);
        }
        if !self.phishing.add(address)? {
            return Ok(false);
        }

        crate::log_phishing!("Phishing address identified: {} ({})", address, reason);

        let time = Utc
            .timestamp_opt(now, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        let mut alerts = self
            .recent_alerts
            .try_write_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::write("phishing alerts"))?;
        alerts.push_front(PhishingAlert {
            address: address.to_string(),
            reason: format!("Phishing address identified: {}", reason),
            timestamp: now,
            time,
        });
        alerts.truncate(ALERT_BUFFER);

        Ok(true)
    }

    /// Compare a mint's on-chain name and symbol against well-known NFT
    /// collections. Returns a flagged verdict only for a lookalike.
    pub fn check_collection(
        &self,
        mint: &str,
        snapshot: &TokenSnapshot,
        collections: &[(String, String)],
    ) -> Result<Option<ClassificationVerdict>, StateError> {
        let name = snapshot.name.as_deref().unwrap_or_default().to_lowercase();
        let symbol = snapshot.symbol.as_deref().unwrap_or_default().to_lowercase();
        if (name.is_empty() && symbol.is_empty()) || self.whitelist.contains(mint)? {
            return Ok(None);
        }

        let settings = self.settings.snapshot()?;
        for (collection, collection_symbol) in collections {
            let name_similarity = similarity(&name, &collection.to_lowercase());
            let symbol_similarity = similarity(&symbol, &collection_symbol.to_lowercase());
            if name_similarity <= settings.collection_name_similarity
                && symbol_similarity <= settings.collection_symbol_similarity
            {
                continue;
            }

            self.phishing_detected.fetch_add(1, Ordering::Relaxed);
            crate::log_phishing!(
                "{} imitates the {} collection (name {:.2}, symbol {:.2})",
                shorten_address(mint, 4),
                collection,
                name_similarity,
                symbol_similarity
            );
            return Ok(Some(ClassificationVerdict::flagged(
                Category::FakeCollection,
                mint,
                name_similarity.max(symbol_similarity),
                vec![format!(
                    "Metadata \"{}\" ({}) imitates {} ({})",
                    snapshot.name.as_deref().unwrap_or_default(),
                    snapshot.symbol.as_deref().unwrap_or_default(),
                    collection,
                    collection_symbol
                )],
            )));
        }

        Ok(None)
    }

    pub fn is_phishing_address(&self, address: &str) -> Result<bool, StateError> {
        if self.whitelist.contains(address)? {
            return Ok(false);
        }
        self.phishing.contains(address)
    }

    pub fn phishing_addresses(&self) -> Result<BTreeSet<String>, StateError> {
        self.phishing.snapshot()
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<PhishingAlert>, StateError> {
        let alerts = self
            .recent_alerts
            .try_read_for(LOCK_TIMEOUT)
            .ok_or_else(|| StateError::read("phishing alerts"))?;
        Ok(alerts.iter().take(limit).cloned().collect())
    }

    /// Domains seen in memos, most frequent first
    pub fn tracked_domains(&self) -> Vec<TrackedDomain> {
        let mut domains: Vec<TrackedDomain> = self.tracked_domains.iter().map(|e| e.value().clone()).collect();
        domains.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
        domains
    }

    pub fn tracked_address(&self, address: &str) -> Option<TrackedAddress> {
        self.tracked_addresses.get(address).map(|t| t.value().clone())
    }

    pub fn get_stats(&self) -> PhishingStats {
        PhishingStats {
            transactions_analyzed: self.transactions_analyzed.load(Ordering::Relaxed),
            phishing_detected: self.phishing_detected.load(Ordering::Relaxed),
            known_phishing_addresses: self.phishing.len(),
            tracked_addresses: self.tracked_addresses.len(),
            tracked_domains: self.tracked_domains.len(),
        }
    }
}

/// Rough likeness of two lowercase strings in `[0, 1]`.
///
/// Strings whose lengths differ by more than 30% never match; containment
/// scores 0.9; otherwise the share of `a`'s characters that appear in `b`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let longest = len_a.max(len_b) as f64;
    if len_a.abs_diff(len_b) as f64 / longest > 0.3 {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return 0.9;
    }
    a.chars().filter(|c| b.contains(*c)).count() as f64 / longest
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::PhishingUrl => "phishing_url",
            PatternKind::NearTotalSolDrain => "near_total_sol_out",
            PatternKind::TokenApproval => "token_approval",
            PatternKind::ApprovalThenTransfer => "approval_then_transfer",
            PatternKind::MultipleTokenTransfersOut => "multiple_token_transfers_out",
        }
    }
}

impl Clone for PhishingClassifier {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            phishing: Arc::clone(&self.phishing),
            whitelist: Arc::clone(&self.whitelist),
            url_pattern: self.url_pattern.clone(),
            domain_rules: Arc::clone(&self.domain_rules),
            tracked_addresses: Arc::clone(&self.tracked_addresses),
            tracked_domains: Arc::clone(&self.tracked_domains),
            recent_alerts: Arc::clone(&self.recent_alerts),
            transactions_analyzed: Arc::clone(&self.transactions_analyzed),
            phishing_detected: Arc::clone(&self.phishing_detected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TransactionEvent};
    use tempfile::TempDir;

    const DRAINER: &str = "DrainerAddr111111111111111111111111111111111";

    fn classifier(dir: &TempDir) -> PhishingClassifier {
        PhishingClassifier::new(
            SharedSettings::default(),
            Arc::new(PersistentSet::load("phishing", dir.path().join("phishing.json"))),
            Arc::new(PersistentSet::load("whitelist", dir.path().join("whitelist.json"))),
        )
        .unwrap()
    }

    fn with_memo(memo: &str) -> WalletTransaction {
        WalletTransaction {
            signature: "memo-sig".into(),
            events: vec![TransactionEvent::sol_transfer(Direction::Incoming, 0.0001, "Spammer")],
            memo: Some(memo.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_memo_domain_short_circuits_and_promotes() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let verdict = ph
            .evaluate(&with_memo("Claim your reward at http://solana-claim.fake.io/now"), 1000)
            .unwrap();
        assert!(verdict.flagged);
        assert!((verdict.confidence - 0.9).abs() < 1e-9);
        assert_eq!(verdict.subject, "Spammer");
        assert!(ph.is_phishing_address("Spammer").unwrap());

        let alerts = ph.recent_alerts(5).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].reason.contains("phishing_url"));
        assert_eq!(ph.tracked_domains()[0].domain, "solana-claim.fake.io");
    }

    #[test]
    fn test_legitimate_domains_pass() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        for memo in [
            "https://phantom-wallet.io/download",
            "see https://solscan.io/tx/abc",
            "https://walletconnect.org",
            "no links here",
        ] {
            assert_eq!(ph.check_memo(memo, 1000), None, "{}", memo);
        }

        for (memo, domain) in [
            ("https://phantom-wallet.app/connect", "phantom-wallet.app"),
            ("visit HTTPS://SolScan.com", "solscan.com"),
            ("http://wallet-connect.net", "wallet-connect.net"),
            ("http://free-sol.xyz", "free-sol.xyz"),
        ] {
            assert_eq!(ph.check_memo(memo, 1000).as_deref(), Some(domain));
        }
    }

    #[test]
    fn test_approval_then_transfer_escalates() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let approval = WalletTransaction {
            events: vec![TransactionEvent::token_approval(DRAINER, Some("MINT"))],
            ..Default::default()
        };
        let first = ph.evaluate(&approval, 1000).unwrap();
        assert!(!first.flagged);
        assert!((first.confidence - 0.3).abs() < 1e-9);

        let drain = WalletTransaction {
            events: vec![TransactionEvent::token_transfer(Direction::Outgoing, 1000.0, DRAINER, "MINT")],
            ..Default::default()
        };
        let second = ph.evaluate(&drain, 1600).unwrap();
        assert!(second.flagged);
        assert!((second.confidence - 0.9).abs() < 1e-9);
        assert!(ph.is_phishing_address(DRAINER).unwrap());
    }

    #[test]
    fn test_approval_expires_after_retention() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let approval = WalletTransaction {
            events: vec![TransactionEvent::token_approval(DRAINER, None)],
            ..Default::default()
        };
        ph.evaluate(&approval, 0).unwrap();

        let drain = WalletTransaction {
            events: vec![TransactionEvent::token_transfer(Direction::Outgoing, 5.0, DRAINER, "MINT")],
            ..Default::default()
        };
        let verdict = ph.evaluate(&drain, 24 * 60 * 60 + 1).unwrap();
        assert!(!verdict.flagged);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_near_total_sol_drain() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let mut tx = WalletTransaction {
            events: vec![TransactionEvent::sol_transfer(Direction::Outgoing, 4.99, DRAINER)],
            sol_balance_after: Some(0.005),
            ..Default::default()
        };
        let verdict = ph.evaluate(&tx, 1000).unwrap();
        assert!(verdict.flagged);
        assert!((verdict.confidence - 0.7).abs() < 1e-9);
        // 0.7 is flagged but not promoted
        assert!(!ph.is_phishing_address(DRAINER).unwrap());

        // Emptied completely is not the drain pattern
        tx.sol_balance_after = Some(0.0);
        assert!(!ph.evaluate(&tx, 1001).unwrap().flagged);
    }

    #[test]
    fn test_many_outgoing_transfers_with_approval() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let mut events: Vec<TransactionEvent> = (0..4)
            .map(|i| TransactionEvent::token_transfer(Direction::Outgoing, 1.0, DRAINER, &format!("M{}", i)))
            .collect();
        let only_transfers = WalletTransaction {
            events: events.clone(),
            ..Default::default()
        };
        let verdict = ph.evaluate(&only_transfers, 1000).unwrap();
        assert!(!verdict.flagged);
        assert!((verdict.confidence - 0.5).abs() < 1e-9);

        events.insert(0, TransactionEvent::token_approval(DRAINER, None));
        let combined = WalletTransaction {
            events,
            ..Default::default()
        };
        let dir2 = TempDir::new().unwrap();
        let fresh = classifier(&dir2);
        let verdict = fresh.evaluate(&combined, 1000).unwrap();
        assert!(verdict.flagged);
        assert!((verdict.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_whitelisted_subject_never_flagged() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);
        ph.whitelist.add("Spammer").unwrap();

        let verdict = ph.evaluate(&with_memo("http://solana-gift.com"), 1000).unwrap();
        assert!(!verdict.flagged);
        assert!(!ph.add_phishing_address("Spammer", "manual", 1000).unwrap());
    }

    #[test]
    fn test_tracked_domains_bounded() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);
        for i in 0..(MAX_TRACKED as i64 + 5) {
            ph.track_domain(&format!("site{}.com", i), i);
        }
        assert_eq!(ph.get_stats().tracked_domains, MAX_TRACKED);
        assert!(ph.tracked_domains().iter().all(|d| d.domain != "site0.com"));
    }

    fn collections() -> Vec<(String, String)> {
        crate::config::ProgramCatalog::default().popular_collections
    }

    fn named(name: &str, symbol: &str) -> TokenSnapshot {
        TokenSnapshot {
            name: Some(name.to_string()),
            symbol: Some(symbol.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_similarity_rules() {
        assert_eq!(similarity("", "mad lads"), 0.0);
        assert_eq!(similarity("mad lads official drop", "mad lads"), 0.0);
        assert_eq!(similarity("mad lad", "mad lads"), 0.9);
        assert_eq!(similarity("dogd", "dgod"), 1.0);
        assert!((similarity("abcd", "abxy") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_lookalike_collection_flagged() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        let verdict = ph
            .check_collection("FakeMint", &named("Mad Lad", "MADL"), &collections())
            .unwrap()
            .unwrap();
        assert!(verdict.flagged);
        assert_eq!(verdict.category, Category::FakeCollection);
        assert_eq!(verdict.subject, "FakeMint");
        assert!(verdict.reasons[0].contains("Mad Lads"));

        // Symbol alone: every character of "DOGD" is in "DGOD"
        let verdict = ph
            .check_collection("OtherMint", &named("Something", "DOGD"), &collections())
            .unwrap();
        assert!(verdict.is_some());
        assert_eq!(ph.get_stats().phishing_detected, 2);
    }

    #[test]
    fn test_unrelated_or_unnamed_tokens_pass() {
        let dir = TempDir::new().unwrap();
        let ph = classifier(&dir);

        assert!(ph
            .check_collection("Mint", &named("Random Token", "RNDM"), &collections())
            .unwrap()
            .is_none());
        assert!(ph
            .check_collection("Mint", &TokenSnapshot::unknown(), &collections())
            .unwrap()
            .is_none());

        ph.whitelist.add("Whitelisted").unwrap();
        assert!(ph
            .check_collection("Whitelisted", &named("Mad Lads", "MAD"), &collections())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_subject_prefers_outgoing_counterpart() {
        let tx = WalletTransaction {
            account: Some("payer".into()),
            events: vec![
                TransactionEvent::sol_transfer(Direction::Incoming, 1.0, "sender"),
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "receiver"),
            ],
            ..Default::default()
        };
        assert_eq!(PhishingClassifier::subject_of(&tx), "receiver");
        assert_eq!(
            PhishingClassifier::subject_of(&WalletTransaction {
                account: Some("payer".into()),
                ..Default::default()
            }),
            "payer"
        );
    }
}
