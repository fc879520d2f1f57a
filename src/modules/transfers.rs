//! Transfer notices - large transfers and movements of honeypot tokens

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ProgramCatalog, SharedSettings};
use crate::error::StateError;
use crate::lookup::TokenSnapshot;
use crate::types::{shorten_address, Category, ClassificationVerdict, EventKind, TransactionEvent, WalletTransaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub large_transfers: u64,
    pub honeypot_movements: u64,
}

/// Raises notices for transfers worth telling the wallet owner about.
///
/// Unlike the classifiers it keeps no per-address state: every notice is
/// derived from the transaction, the honeypot verdicts made for it and the
/// token snapshots.
pub struct TransferWatcher {
    settings: SharedSettings,
    catalog: Arc<ProgramCatalog>,

    large_transfers: Arc<AtomicU64>,
    honeypot_movements: Arc<AtomicU64>,
}

impl TransferWatcher {
    pub fn new(settings: SharedSettings, catalog: Arc<ProgramCatalog>) -> Self {
        Self {
            settings,
            catalog,
            large_transfers: Arc::new(AtomicU64::new(0)),
            honeypot_movements: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Notices for `tx`. `honeypots` holds the mints flagged as honeypots
    /// for this transaction.
    pub fn evaluate(
        &self,
        tx: &WalletTransaction,
        honeypots: &HashSet<String>,
        snapshots: &HashMap<String, TokenSnapshot>,
    ) -> Result<Vec<ClassificationVerdict>, StateError> {
        let settings = self.settings.snapshot()?;
        let mut notices = Vec::new();

        for event in tx.events.iter().filter(|e| e.kind.is_transfer()) {
            let large = match (event.kind, event.mint.as_deref()) {
                (EventKind::SolTransfer, _) if event.amount > settings.large_transfer_sol => Some("SOL"),
                (EventKind::TokenTransfer, Some(mint)) => self
                    .catalog
                    .token_name(mint)
                    .filter(|_| event.amount > settings.large_transfer_tokens),
                _ => None,
            };
            if let Some(token) = large {
                self.large_transfers.fetch_add(1, Ordering::Relaxed);
                notices.push(ClassificationVerdict::flagged(
                    Category::LargeTransfer,
                    token,
                    1.0,
                    vec![describe_transfer(event, token)],
                ));
            }
        }

        let swap_program = tx
            .program_ids
            .iter()
            .find(|p| self.catalog.swap_programs.contains(p));

        let mut seen = HashSet::new();
        for event in tx.events.iter().filter(|e| e.kind == EventKind::TokenTransfer) {
            let Some(mint) = event.mint.as_deref().filter(|m| honeypots.contains(*m)) else {
                continue;
            };

            if event.is_outgoing() {
                self.honeypot_movements.fetch_add(1, Ordering::Relaxed);
                notices.push(ClassificationVerdict::flagged(
                    Category::HoneypotTransfer,
                    mint,
                    1.0,
                    vec![describe_transfer(event, "honeypot tokens")],
                ));
            }

            if !seen.insert(mint) {
                continue;
            }

            if let Some(program) = swap_program {
                self.honeypot_movements.fetch_add(1, Ordering::Relaxed);
                notices.push(ClassificationVerdict::flagged(
                    Category::HoneypotSwap,
                    mint,
                    1.0,
                    vec![format!("Swap routed through {}", shorten_address(program, 8))],
                ));
            }

            if snapshots.get(mint).and_then(|s| s.price_usd) == Some(0.0) {
                notices.push(ClassificationVerdict::flagged(
                    Category::TokenWorthless,
                    mint,
                    1.0,
                    vec!["This token appears to be worthless now".to_string()],
                ));
            }
        }

        Ok(notices)
    }

    pub fn get_stats(&self) -> TransferStats {
        TransferStats {
            large_transfers: self.large_transfers.load(Ordering::Relaxed),
            honeypot_movements: self.honeypot_movements.load(Ordering::Relaxed),
        }
    }
}

fn describe_transfer(event: &TransactionEvent, token: &str) -> String {
    let other = event
        .counterpart
        .as_deref()
        .map(|c| shorten_address(c, 8))
        .unwrap_or_else(|| "unknown".to_string());
    if event.is_outgoing() {
        format!("Sent {:.4} {} to {}", event.amount, token, other)
    } else {
        format!("Received {:.4} {} from {}", event.amount, token, other)
    }
}

impl Clone for TransferWatcher {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            catalog: Arc::clone(&self.catalog),
            large_transfers: Arc::clone(&self.large_transfers),
            honeypot_movements: Arc::clone(&self.honeypot_movements),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const JUPITER: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";

    fn watcher() -> TransferWatcher {
        TransferWatcher::new(SharedSettings::default(), Arc::new(ProgramCatalog::default()))
    }

    fn categories(verdicts: &[ClassificationVerdict]) -> Vec<Category> {
        verdicts.iter().map(|v| v.category).collect()
    }

    #[test]
    fn test_large_sol_and_known_token_transfers() {
        let w = watcher();
        let tx = WalletTransaction {
            events: vec![
                TransactionEvent::sol_transfer(Direction::Outgoing, 2.5, "Friend"),
                TransactionEvent::sol_transfer(Direction::Incoming, 1.0, "Friend"),
                TransactionEvent::token_transfer(Direction::Incoming, 250.0, "Payer", USDC),
                TransactionEvent::token_transfer(Direction::Incoming, 5000.0, "Payer", "UnknownMint"),
            ],
            ..Default::default()
        };

        let notices = w.evaluate(&tx, &HashSet::new(), &HashMap::new()).unwrap();
        assert_eq!(categories(&notices), vec![Category::LargeTransfer, Category::LargeTransfer]);
        assert_eq!(notices[0].subject, "SOL");
        assert!(notices[0].reasons[0].starts_with("Sent 2.5000 SOL to"));
        assert_eq!(notices[1].subject, "USDC");
        assert!(notices[1].reasons[0].starts_with("Received 250.0000 USDC from"));
        assert_eq!(w.get_stats().large_transfers, 2);
    }

    #[test]
    fn test_honeypot_sent_through_swap_and_worthless() {
        let w = watcher();
        let tx = WalletTransaction {
            events: vec![
                TransactionEvent::token_transfer(Direction::Outgoing, 10.0, "pool", "Honey"),
                TransactionEvent::token_transfer(Direction::Outgoing, 5.0, "pool", "Honey"),
            ],
            program_ids: vec![JUPITER.into()],
            ..Default::default()
        };
        let honeypots = HashSet::from(["Honey".to_string()]);
        let snapshots = HashMap::from([(
            "Honey".to_string(),
            TokenSnapshot {
                price_usd: Some(0.0),
                ..Default::default()
            },
        )]);

        let notices = w.evaluate(&tx, &honeypots, &snapshots).unwrap();
        assert_eq!(
            categories(&notices),
            vec![
                Category::HoneypotTransfer,
                Category::HoneypotSwap,
                Category::TokenWorthless,
                Category::HoneypotTransfer,
            ]
        );
        assert!(notices.iter().all(|n| n.subject == "Honey" && n.flagged));
    }

    #[test]
    fn test_incoming_honeypot_without_swap_is_quiet_when_priced() {
        let w = watcher();
        let tx = WalletTransaction {
            events: vec![TransactionEvent::token_transfer(Direction::Incoming, 10.0, "Airdropper", "Honey")],
            ..Default::default()
        };
        let honeypots = HashSet::from(["Honey".to_string()]);

        let notices = w.evaluate(&tx, &honeypots, &HashMap::new()).unwrap();
        assert!(notices.is_empty());
    }
}
