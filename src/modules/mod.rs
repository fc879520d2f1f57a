//! WalletGuard classification modules

pub mod honeypot;
pub mod monitor;
pub mod phishing;
pub mod pipeline;
pub mod suspicious;
pub mod transfers;

pub use honeypot::HoneypotClassifier;
pub use monitor::WalletMonitor;
pub use phishing::PhishingClassifier;
pub use pipeline::ClassificationPipeline;
pub use suspicious::SuspiciousActivityClassifier;
pub use transfers::TransferWatcher;
