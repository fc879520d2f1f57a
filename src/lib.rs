//! WalletGuard - Solana wallet classifier
//!
//! Classifies every transaction touching a monitored wallet for:
//! - Honeypot tokens
//! - Suspicious counterpart activity
//! - Phishing patterns
//!
//! Read-only: no keys are held and nothing is signed.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod lookup;
pub mod modules;
pub mod types;
pub mod utils;
