//! Token lookups performed before classification

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Off-chain/on-chain facts about a mint.
///
/// `None` means unknown (lookup failed or not supported) and is treated as
/// "signal absent" by every classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub price_usd: Option<f64>,
    pub has_metadata: Option<bool>,
    pub holder_count: Option<u64>,
    /// Mint authority or deployer, when known
    pub creator: Option<String>,
    /// True on-chain creation time (unix seconds), when known
    pub created_at: Option<i64>,
    /// Metadata name and symbol, when the mint has on-chain metadata
    pub name: Option<String>,
    pub symbol: Option<String>,
}

impl TokenSnapshot {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Source of token facts.
///
/// Implementations must never fail the caller: anything that cannot be
/// determined is reported as `None` in the snapshot.
pub trait TokenDataSource: Send + Sync + 'static {
    fn token_snapshot(&self, mint: &str) -> impl Future<Output = TokenSnapshot> + Send;
}
