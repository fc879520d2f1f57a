//! Side-effect detectors run on every transaction: flash launches, unsellable
//! tokens, Sybil clusters, bridge abuse and fund obfuscation.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use crate::config::{ClassifierSettings, ProgramCatalog};
use crate::lookup::TokenSnapshot;
use crate::types::{shorten_address, Category, Direction, EventKind, WalletTransaction};

/// Per-mint history for flash-launch and unsellable detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    /// First observation unless a lookup supplied the real creation time
    pub created_at: i64,
    pub creation_time_known: bool,
    pub buys: u32,
    pub sells: u32,
    pub failed_sells: u32,
    pub creators: BTreeSet<String>,
    pub liquidity_events: Vec<i64>,
}

impl TokenState {
    fn new(first_seen: i64) -> Self {
        Self {
            created_at: first_seen,
            creation_time_known: false,
            buys: 0,
            sells: 0,
            failed_sells: 0,
            creators: BTreeSet::new(),
            liquidity_events: Vec::new(),
        }
    }

    fn liquidity_events_after_launch(&self, window: i64) -> usize {
        self.liquidity_events
            .iter()
            .filter(|t| **t >= self.created_at && **t - self.created_at <= window)
            .count()
    }
}

/// Addresses sharing one behavior signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletGroup {
    pub behavior_key: String,
    /// member -> first-seen timestamp
    pub members: HashMap<String, i64>,
}

impl WalletGroup {
    /// True when `size` members were first seen inside one `window`
    fn is_clustered(&self, size: usize, window: i64) -> bool {
        if size == 0 || self.members.len() < size {
            return false;
        }
        let mut first_seen: Vec<i64> = self.members.values().copied().collect();
        first_seen.sort_unstable();
        first_seen
            .windows(size)
            .any(|w| w[size - 1] - w[0] <= window)
    }
}

/// Bridge interactions of one address
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeActivity {
    pub timestamps: VecDeque<i64>,
    pub programs: BTreeSet<String>,
}

/// An address a detector wants added to the suspicious set
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub address: String,
    pub category: Category,
    pub confidence: f64,
    pub reason: String,
}

impl Promotion {
    fn new(address: &str, category: Category, reason: String) -> Self {
        let confidence = match category {
            Category::FlashLaunch => 0.9,
            Category::UnsellableToken => 0.85,
            Category::SybilCluster => 0.8,
            Category::FundObfuscation => 0.7,
            Category::BridgeAbuse => 0.6,
            _ => 0.5,
        };
        Self {
            address: address.to_string(),
            category,
            confidence,
            reason,
        }
    }
}

/// Behavior signature: hash of sorted distinct program ids and event kinds
pub fn behavior_key(tx: &WalletTransaction) -> Option<String> {
    let programs: BTreeSet<&str> = tx.program_ids.iter().map(String::as_str).collect();
    let kinds: BTreeSet<EventKind> = tx.events.iter().map(|e| e.kind).collect();

    if programs.is_empty() && kinds.is_empty() {
        return None;
    }

    let mut hasher = DefaultHasher::new();
    programs.hash(&mut hasher);
    kinds.hash(&mut hasher);
    Some(format!("{:016x}", hasher.finish()))
}

/// State owned by the five sub-detectors
pub struct SubDetectors {
    catalog: Arc<ProgramCatalog>,
    tokens: DashMap<String, TokenState>,
    groups: DashMap<String, WalletGroup>,
    bridges: DashMap<String, BridgeActivity>,
    unsellable: DashMap<String, i64>,
}

impl SubDetectors {
    pub fn new(catalog: Arc<ProgramCatalog>) -> Self {
        Self {
            catalog,
            tokens: DashMap::new(),
            groups: DashMap::new(),
            bridges: DashMap::new(),
            unsellable: DashMap::new(),
        }
    }

    /// Feed one transaction through every detector
    pub fn observe(
        &self,
        tx: &WalletTransaction,
        snapshots: &HashMap<String, TokenSnapshot>,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<Promotion> {
        let mut promotions = Vec::new();
        promotions.extend(self.flash_launch(tx, snapshots, settings, now));
        promotions.extend(self.unsellable_token(tx, settings, now));
        promotions.extend(self.sybil_cluster(tx, settings, now));
        promotions.extend(self.bridge_abuse(tx, settings, now));
        promotions.extend(self.fund_obfuscation(tx, settings));
        promotions
    }

    fn flash_launch(
        &self,
        tx: &WalletTransaction,
        snapshots: &HashMap<String, TokenSnapshot>,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<Promotion> {
        let via_swap = tx.touches_any(&self.catalog.swap_programs);
        let via_pool = tx.touches_any(&self.catalog.liquidity_programs);
        let mut promotions = Vec::new();

        for mint in tx.mints() {
            let snapshot = snapshots.get(&mint);
            let mut state = self
                .tokens
                .entry(mint.clone())
                .or_insert_with(|| TokenState::new(now));

            if let Some(created) = snapshot.and_then(|s| s.created_at) {
                state.created_at = created;
                state.creation_time_known = true;
            }
            if let Some(creator) = snapshot.and_then(|s| s.creator.as_ref()) {
                state.creators.insert(creator.clone());
            }

            for event in tx.events.iter().filter(|e| e.mint.as_deref() == Some(mint.as_str())) {
                match event.kind {
                    EventKind::MintTo => {
                        if let Some(authority) = &event.counterpart {
                            state.creators.insert(authority.clone());
                        }
                    }
                    EventKind::TokenTransfer if via_swap && !tx.failed => match event.direction {
                        Direction::Incoming => state.buys += 1,
                        Direction::Outgoing => state.sells += 1,
                    },
                    _ => {}
                }
            }

            if via_pool && !tx.failed {
                state.liquidity_events.push(now);
            }

            let launched_fast = state.liquidity_events_after_launch(settings.flash_launch_window) as f64
                >= settings.flash_min_liquidity_events;
            let buy_pressure = state.buys as f64 > settings.flash_min_buys
                && state.buys as f64 >= settings.flash_buy_sell_ratio * state.sells as f64;

            if launched_fast && buy_pressure {
                debug!(
                    target: "SUSPICIOUS",
                    "Flash launch pattern on {}: {} buys / {} sells",
                    shorten_address(&mint, 4),
                    state.buys,
                    state.sells
                );
                for creator in &state.creators {
                    promotions.push(Promotion::new(
                        creator,
                        Category::FlashLaunch,
                        format!(
                            "Creator of flash-launched token {} ({} buys / {} sells)",
                            shorten_address(&mint, 4),
                            state.buys,
                            state.sells
                        ),
                    ));
                }
            }
        }

        promotions
    }

    fn unsellable_token(
        &self,
        tx: &WalletTransaction,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<Promotion> {
        if !tx.failed || !tx.touches_any(&self.catalog.swap_programs) {
            return Vec::new();
        }

        let mut promotions = Vec::new();
        for mint in tx.attempted_mints() {
            if self.catalog.is_known_token(&mint) {
                continue;
            }
            let mut state = self
                .tokens
                .entry(mint.clone())
                .or_insert_with(|| TokenState::new(now));
            state.failed_sells += 1;

            if state.failed_sells as f64 >= settings.unsellable_failed_sells {
                self.unsellable.entry(mint.clone()).or_insert(now);
                if let Some(account) = &tx.account {
                    promotions.push(Promotion::new(
                        account,
                        Category::UnsellableToken,
                        format!(
                            "{} failed sells of token {}",
                            state.failed_sells,
                            shorten_address(&mint, 4)
                        ),
                    ));
                }
            }
        }
        promotions
    }

    fn sybil_cluster(
        &self,
        tx: &WalletTransaction,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<Promotion> {
        let (Some(account), Some(key)) = (tx.account.as_ref(), behavior_key(tx)) else {
            return Vec::new();
        };

        let mut group = self.groups.entry(key.clone()).or_insert_with(|| WalletGroup {
            behavior_key: key,
            members: HashMap::new(),
        });
        group.members.entry(account.clone()).or_insert(now);

        let size = settings.sybil_min_group_size.ceil() as usize;
        if !group.is_clustered(size, settings.sybil_window) {
            return Vec::new();
        }

        group
            .members
            .keys()
            .map(|member| {
                Promotion::new(
                    member,
                    Category::SybilCluster,
                    format!(
                        "Member of {}-wallet cluster with identical behavior {}",
                        group.members.len(),
                        group.behavior_key
                    ),
                )
            })
            .collect()
    }

    fn bridge_abuse(
        &self,
        tx: &WalletTransaction,
        settings: &ClassifierSettings,
        now: i64,
    ) -> Vec<Promotion> {
        let Some(account) = tx.account.as_ref() else {
            return Vec::new();
        };
        let bridges: Vec<&String> = tx
            .program_ids
            .iter()
            .filter(|p| self.catalog.bridge_programs.contains(p))
            .collect();
        if bridges.is_empty() {
            return Vec::new();
        }

        let mut activity = self.bridges.entry(account.clone()).or_default();
        activity.timestamps.push_back(now);
        activity.programs.extend(bridges.into_iter().cloned());

        let cutoff = now - settings.bridge_window;
        while activity.timestamps.front().map_or(false, |t| *t < cutoff) {
            activity.timestamps.pop_front();
        }

        if activity.timestamps.len() as f64 >= settings.bridge_min_interactions {
            vec![Promotion::new(
                account,
                Category::BridgeAbuse,
                format!(
                    "{} bridge interactions within {}s",
                    activity.timestamps.len(),
                    settings.bridge_window
                ),
            )]
        } else {
            Vec::new()
        }
    }

    fn fund_obfuscation(&self, tx: &WalletTransaction, settings: &ClassifierSettings) -> Vec<Promotion> {
        let targets: BTreeSet<&String> = tx
            .events
            .iter()
            .filter(|e| e.kind.is_transfer() && e.is_outgoing())
            .filter_map(|e| e.counterpart.as_ref())
            .collect();

        if (targets.len() as f64) < settings.obfuscation_min_counterparts {
            return Vec::new();
        }

        let reason = format!("Funds split across {} addresses in one transaction", targets.len());
        let mut promotions: Vec<Promotion> = tx
            .account
            .iter()
            .map(|origin| Promotion::new(origin, Category::FundObfuscation, reason.clone()))
            .collect();

        let origin = tx.account.as_ref();
        promotions.extend(
            targets
                .into_iter()
                .filter(|t| Some(*t) != origin)
                .map(|t| Promotion::new(t, Category::FundObfuscation, reason.clone())),
        );
        promotions
    }

    /// Mints that crossed the failed-sell threshold, with the time they did
    pub fn unsellable_mints(&self) -> Vec<(String, i64)> {
        let mut mints: Vec<(String, i64)> = self
            .unsellable
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        mints.sort_by_key(|(_, t)| *t);
        mints
    }

    pub fn token_state(&self, mint: &str) -> Option<TokenState> {
        self.tokens.get(mint).map(|s| s.value().clone())
    }

    /// Groups with at least two members, largest first
    pub fn wallet_groups(&self) -> Vec<WalletGroup> {
        let mut groups: Vec<WalletGroup> = self
            .groups
            .iter()
            .filter(|g| g.members.len() > 1)
            .map(|g| g.value().clone())
            .collect();
        groups.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
        groups
    }

    pub fn tracked_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Addresses with recorded bridge activity
    pub fn bridge_addresses(&self) -> HashSet<String> {
        self.bridges.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionEvent;

    const RAYDIUM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
    const JUPITER: &str = "JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB";
    const WORMHOLE: &str = "wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb";
    const SYSTEM: &str = "11111111111111111111111111111111";

    fn detectors() -> SubDetectors {
        SubDetectors::new(Arc::new(ProgramCatalog::default()))
    }

    fn swap(account: &str, mint: &str, direction: Direction, programs: &[&str]) -> WalletTransaction {
        WalletTransaction {
            signature: format!("sig-{}", account),
            account: Some(account.to_string()),
            events: vec![TransactionEvent::token_transfer(direction, 100.0, "pool", mint)],
            program_ids: programs.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn categories(promotions: &[Promotion]) -> Vec<Category> {
        promotions.iter().map(|p| p.category).collect()
    }

    #[test]
    fn test_flash_launch_promotes_creators() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let mint = "FlashMint";

        let mut mint_tx = WalletTransaction {
            account: Some("dev".into()),
            program_ids: vec![RAYDIUM.into()],
            ..Default::default()
        };
        mint_tx.events.push(TransactionEvent {
            kind: EventKind::MintTo,
            direction: Direction::Incoming,
            amount: 1e9,
            counterpart: Some("dev".into()),
            mint: Some(mint.into()),
        });
        let snapshots = HashMap::new();
        assert!(d.observe(&mint_tx, &snapshots, &settings, 1000).is_empty());

        let mut promoted = Vec::new();
        for i in 0..6 {
            promoted = d.observe(
                &swap(&format!("buyer{}", i), mint, Direction::Incoming, &[RAYDIUM]),
                &snapshots,
                &settings,
                1100 + i,
            );
        }

        let state = d.token_state(mint).unwrap();
        assert_eq!(state.buys, 6);
        assert!(state.liquidity_events.len() >= 2);
        assert!(promoted
            .iter()
            .any(|p| p.address == "dev" && p.category == Category::FlashLaunch));
    }

    #[test]
    fn test_flash_launch_needs_buy_pressure() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::from([(
            "M".to_string(),
            TokenSnapshot {
                creator: Some("dev".into()),
                ..Default::default()
            },
        )]);

        for i in 0..6 {
            d.observe(&swap("b", "M", Direction::Incoming, &[RAYDIUM]), &snapshots, &settings, 100 + i);
        }
        // 6 buys vs 3 sells is only 2:1
        let mut last = Vec::new();
        for i in 0..3 {
            last = d.observe(&swap("s", "M", Direction::Outgoing, &[RAYDIUM]), &snapshots, &settings, 200 + i);
        }
        assert!(!categories(&last).contains(&Category::FlashLaunch));
    }

    #[test]
    fn test_flash_launch_uses_known_creation_time() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        // Created two hours before the first liquidity event
        let snapshots = HashMap::from([(
            "M".to_string(),
            TokenSnapshot {
                creator: Some("dev".into()),
                created_at: Some(0),
                ..Default::default()
            },
        )]);

        let mut last = Vec::new();
        for i in 0..8 {
            last = d.observe(&swap("b", "M", Direction::Incoming, &[RAYDIUM]), &snapshots, &settings, 7200 + i);
        }
        assert!(d.token_state("M").unwrap().creation_time_known);
        assert!(!categories(&last).contains(&Category::FlashLaunch));
    }

    #[test]
    fn test_unsellable_after_three_failed_sells() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::new();

        let mut tx = swap("victim", "Trap", Direction::Outgoing, &[JUPITER]);
        tx.failed = true;

        assert!(d.observe(&tx, &snapshots, &settings, 10).is_empty());
        assert!(d.observe(&tx, &snapshots, &settings, 20).is_empty());
        let promoted = d.observe(&tx, &snapshots, &settings, 30);

        assert_eq!(categories(&promoted), vec![Category::UnsellableToken]);
        assert_eq!(promoted[0].address, "victim");
        assert_eq!(d.unsellable_mints(), vec![("Trap".to_string(), 30)]);
        assert_eq!(d.token_state("Trap").unwrap().sells, 0);
    }

    #[test]
    fn test_unsellable_counts_failed_swaps_without_transfer_events() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::new();

        // A rejected sell leaves no transfer event, only the wallet's holdings
        let tx = WalletTransaction {
            account: Some("victim".into()),
            failed: true,
            failed_mints: vec![
                "Trap".to_string(),
                "So11111111111111111111111111111111111111112".to_string(),
            ],
            program_ids: vec![JUPITER.into()],
            ..Default::default()
        };

        assert!(d.observe(&tx, &snapshots, &settings, 10).is_empty());
        assert!(d.observe(&tx, &snapshots, &settings, 20).is_empty());
        let promoted = d.observe(&tx, &snapshots, &settings, 30);

        assert_eq!(categories(&promoted), vec![Category::UnsellableToken]);
        assert_eq!(d.unsellable_mints(), vec![("Trap".to_string(), 30)]);
        assert!(d.token_state("So11111111111111111111111111111111111111112").is_none());
    }

    fn sybil_tx(account: &str) -> WalletTransaction {
        WalletTransaction {
            account: Some(account.to_string()),
            events: vec![TransactionEvent::sol_transfer(Direction::Incoming, 0.001, account)],
            program_ids: vec![SYSTEM.into(), "AirDropProgram1111111111111111111111111111".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_sybil_requires_temporal_clustering() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::new();

        // 10 members spread 60s apart: span 540s > 300s window
        for i in 0..10 {
            let promoted = d.observe(&sybil_tx(&format!("w{}", i)), &snapshots, &settings, i * 60);
            assert!(!categories(&promoted).contains(&Category::SybilCluster));
        }
        assert_eq!(d.wallet_groups()[0].members.len(), 10);
    }

    #[test]
    fn test_sybil_promotes_tight_cluster() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::new();

        let mut promoted = Vec::new();
        for i in 0..10 {
            promoted = d.observe(&sybil_tx(&format!("w{}", i)), &snapshots, &settings, 1000 + i * 30);
        }
        let sybils: Vec<&Promotion> = promoted
            .iter()
            .filter(|p| p.category == Category::SybilCluster)
            .collect();
        assert_eq!(sybils.len(), 10);
    }

    #[test]
    fn test_behavior_key_ignores_order() {
        let mut a = sybil_tx("a");
        let mut b = sybil_tx("b");
        b.program_ids.reverse();
        assert_eq!(behavior_key(&a), behavior_key(&b));

        a.program_ids.push(JUPITER.into());
        assert_ne!(behavior_key(&a), behavior_key(&b));
        assert_eq!(behavior_key(&WalletTransaction::default()), None);
    }

    #[test]
    fn test_bridge_abuse_window() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let snapshots = HashMap::new();
        let tx = WalletTransaction {
            account: Some("bridger".into()),
            program_ids: vec![WORMHOLE.into()],
            ..Default::default()
        };

        assert!(d.observe(&tx, &snapshots, &settings, 0).is_empty());
        // Second interaction after the 600s window: first one pruned
        assert!(d.observe(&tx, &snapshots, &settings, 700).is_empty());
        let promoted = d.observe(&tx, &snapshots, &settings, 900);
        assert_eq!(categories(&promoted), vec![Category::BridgeAbuse]);
        assert!(d.bridge_addresses().contains("bridger"));
    }

    #[test]
    fn test_fund_obfuscation_promotes_origin_and_targets() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let tx = WalletTransaction {
            account: Some("origin".into()),
            events: vec![
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "a"),
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "b"),
                TransactionEvent::token_transfer(Direction::Outgoing, 1.0, "c", "M"),
                TransactionEvent::sol_transfer(Direction::Incoming, 1.0, "d"),
            ],
            program_ids: vec![SYSTEM.into()],
            ..Default::default()
        };

        let promoted: Vec<String> = d
            .fund_obfuscation(&tx, &settings)
            .into_iter()
            .map(|p| p.address)
            .collect();
        assert_eq!(promoted, vec!["origin", "a", "b", "c"]);
    }

    #[test]
    fn test_two_counterparts_not_obfuscation() {
        let d = detectors();
        let settings = ClassifierSettings::default();
        let tx = WalletTransaction {
            account: Some("origin".into()),
            events: vec![
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "a"),
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "b"),
                TransactionEvent::sol_transfer(Direction::Outgoing, 1.0, "a"),
            ],
            ..Default::default()
        };
        assert!(d.fund_obfuscation(&tx, &settings).is_empty());
    }
}
