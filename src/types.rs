//! Shared data model: decoded transactions, verdicts and alerts

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind of a normalized on-chain effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SolTransfer,
    TokenTransfer,
    TokenApproval,
    MintTo,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SolTransfer => "sol_transfer",
            EventKind::TokenTransfer => "token_transfer",
            EventKind::TokenApproval => "token_approval",
            EventKind::MintTo => "mint_to",
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, EventKind::SolTransfer | EventKind::TokenTransfer)
    }
}

/// Direction relative to the monitored wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One normalized on-chain effect (transfer, approval, mint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub kind: EventKind,
    pub direction: Direction,
    /// SOL for SOL transfers, UI amount for tokens
    pub amount: f64,
    pub counterpart: Option<String>,
    pub mint: Option<String>,
}

impl TransactionEvent {
    pub fn sol_transfer(direction: Direction, amount: f64, counterpart: &str) -> Self {
        Self {
            kind: EventKind::SolTransfer,
            direction,
            amount,
            counterpart: Some(counterpart.to_string()),
            mint: None,
        }
    }

    pub fn token_transfer(direction: Direction, amount: f64, counterpart: &str, mint: &str) -> Self {
        Self {
            kind: EventKind::TokenTransfer,
            direction,
            amount,
            counterpart: Some(counterpart.to_string()),
            mint: Some(mint.to_string()),
        }
    }

    pub fn token_approval(delegate: &str, mint: Option<&str>) -> Self {
        Self {
            kind: EventKind::TokenApproval,
            direction: Direction::Outgoing,
            amount: 0.0,
            counterpart: Some(delegate.to_string()),
            mint: mint.map(String::from),
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}

/// A decoded transaction touching the monitored wallet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub signature: String,
    /// Unix seconds
    pub block_time: i64,
    /// Fee payer / initiating account
    pub account: Option<String>,
    pub events: Vec<TransactionEvent>,
    /// Raw per-instruction program ids, in instruction order
    pub program_ids: Vec<String>,
    pub failed: bool,
    /// Mints held by the wallet in a failed transaction, read from its token
    /// balances since a rejected transfer leaves no event behind
    #[serde(default)]
    pub failed_mints: Vec<String>,
    pub memo: Option<String>,
    /// SOL left on the monitored wallet after the transaction
    pub sol_balance_after: Option<f64>,
}

impl WalletTransaction {
    /// Distinct counterpart addresses in event order
    pub fn counterparts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter_map(|e| e.counterpart.as_ref())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }

    /// Distinct mints referenced by any event, in event order
    pub fn mints(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter_map(|e| e.mint.as_ref())
            .filter(|m| seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    /// Mints referenced by events plus, for failed transactions, the mints
    /// the wallet held
    pub fn attempted_mints(&self) -> Vec<String> {
        let mut mints = self.mints();
        for mint in &self.failed_mints {
            if !mints.contains(mint) {
                mints.push(mint.clone());
            }
        }
        mints
    }

    pub fn touches_any(&self, programs: &[String]) -> bool {
        self.program_ids.iter().any(|p| programs.contains(p))
    }

    pub fn has_kind(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    pub fn outgoing_token_transfers(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::TokenTransfer && e.is_outgoing())
            .count()
    }
}

/// What a verdict is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Honeypot,
    SuspiciousActivity,
    FlashLaunch,
    UnsellableToken,
    SybilCluster,
    BridgeAbuse,
    FundObfuscation,
    Phishing,
    FakeCollection,
    LargeTransfer,
    HoneypotTransfer,
    HoneypotSwap,
    TokenWorthless,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Honeypot => "honeypot",
            Category::SuspiciousActivity => "suspicious_activity",
            Category::FlashLaunch => "flash_launch",
            Category::UnsellableToken => "unsellable_token",
            Category::SybilCluster => "sybil_cluster",
            Category::BridgeAbuse => "bridge_abuse",
            Category::FundObfuscation => "fund_obfuscation",
            Category::Phishing => "phishing",
            Category::FakeCollection => "fake_collection",
            Category::LargeTransfer => "large_transfer",
            Category::HoneypotTransfer => "honeypot_transfer",
            Category::HoneypotSwap => "honeypot_swap",
            Category::TokenWorthless => "token_worthless",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Honeypot => "Honeypot Token Detected",
            Category::SuspiciousActivity => "Suspicious Activity",
            Category::FlashLaunch => "Flash Token Launch",
            Category::UnsellableToken => "Unsellable Token",
            Category::SybilCluster => "Sybil Wallet Cluster",
            Category::BridgeAbuse => "Bridge Abuse",
            Category::FundObfuscation => "Fund Obfuscation",
            Category::Phishing => "Phishing Pattern",
            Category::FakeCollection => "Fake NFT Collection",
            Category::LargeTransfer => "Large Transfer Detected",
            Category::HoneypotTransfer => "Honeypot Token Transfer",
            Category::HoneypotSwap => "Honeypot Swap Attempted",
            Category::TokenWorthless => "Token Value Alert",
        }
    }

    /// Whether the verdict subject names a token rather than an address
    pub fn is_token_subject(&self) -> bool {
        matches!(
            self,
            Category::Honeypot
                | Category::FakeCollection
                | Category::LargeTransfer
                | Category::HoneypotTransfer
                | Category::HoneypotSwap
                | Category::TokenWorthless
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one classifier for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub subject: String,
    pub flagged: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub category: Category,
}

impl ClassificationVerdict {
    pub fn flagged(category: Category, subject: &str, confidence: f64, reasons: Vec<String>) -> Self {
        Self {
            subject: subject.to_string(),
            flagged: true,
            confidence,
            reasons,
            category,
        }
    }

    pub fn clear(category: Category, subject: &str, confidence: f64, reasons: Vec<String>) -> Self {
        Self {
            subject: subject.to_string(),
            flagged: false,
            confidence,
            reasons,
            category,
        }
    }
}

/// Alert payload handed to the delivery boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub category: Category,
    pub subject: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub timestamp: i64,
}

impl Alert {
    pub fn from_verdict(verdict: &ClassificationVerdict, timestamp: i64) -> Self {
        Self {
            category: verdict.category,
            subject: verdict.subject.clone(),
            confidence: verdict.confidence,
            reasons: verdict.reasons.clone(),
            timestamp,
        }
    }
}

/// A transaction annotated with every verdict produced for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedTransaction {
    pub transaction: WalletTransaction,
    pub verdicts: Vec<ClassificationVerdict>,
}

impl ClassifiedTransaction {
    pub fn flagged(&self) -> impl Iterator<Item = &ClassificationVerdict> {
        self.verdicts.iter().filter(|v| v.flagged)
    }

    pub fn is_flagged(&self) -> bool {
        self.verdicts.iter().any(|v| v.flagged)
    }
}

/// Shorten an address for display
pub fn shorten_address(address: &str, chars: usize) -> String {
    if address.len() <= chars * 2 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..chars], &address[address.len() - chars..])
}
