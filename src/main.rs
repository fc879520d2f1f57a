//! WalletGuard - Solana wallet classifier
//!
//! Watches a single wallet and classifies every transaction for honeypot
//! tokens, suspicious counterpart activity and phishing patterns.
//!
//! This is a **monitoring-only** tool - no keys are held and nothing is signed.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use walletguard::config::{Config, ProgramCatalog};
use walletguard::dashboard::DashboardServer;
use walletguard::modules::{ClassificationPipeline, WalletMonitor};
use walletguard::utils::{init_logger, AlertService, DatabaseService, MetricsService, SolanaService};

const BANNER: &str = r#"
    ╔═══════════════════════════════════════════════════════╗
    ║                                                       ║
    ║   🛡️  WalletGuard (Monitor-Only Mode)                  ║
    ║   🍯 Honeypots | ⚠️  Suspicious Activity | 🎣 Phishing  ║
    ║                                                       ║
    ╚═══════════════════════════════════════════════════════╝
"#;

/// WalletGuard application
pub struct WalletGuard {
    config: Config,
    solana: Arc<SolanaService>,
    pipeline: ClassificationPipeline<SolanaService>,
    monitor: WalletMonitor,
}

impl WalletGuard {
    /// Create a new WalletGuard instance
    pub fn new() -> Result<Self> {
        let config = Config::from_env();

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        // Initialize services
        let catalog = Arc::new(ProgramCatalog::default());
        let metrics = MetricsService::new()?;
        let database = DatabaseService::new(config.database_file())?;
        let alerts = AlertService::new(config.clone());
        let solana = Arc::new(SolanaService::new(
            config.clone(),
            Arc::clone(&catalog),
            metrics.clone(),
        )?);

        let pipeline = ClassificationPipeline::new(
            &config,
            Arc::clone(&solana),
            catalog,
            alerts,
            metrics,
            database,
        )?;

        let monitor = WalletMonitor::new(config.clone(), Arc::clone(&solana), pipeline.clone());

        Ok(Self {
            config,
            solana,
            pipeline,
            monitor,
        })
    }

    /// Start WalletGuard; returns when the monitor stops
    pub async fn start(&self) -> Result<()> {
        println!("{}", BANNER);

        info!(target: "WALLETGUARD", "Initializing WalletGuard for {}", self.config.wallet_address);

        // Start Solana WebSocket subscription
        self.solana.start_log_subscription().await?;

        let dashboard = DashboardServer::new(
            self.config.clone(),
            self.pipeline.clone(),
            self.monitor.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = dashboard.start().await {
                error!(target: "DASHBOARD", "Dashboard failed: {:#}", e);
            }
        });
        info!(target: "WALLETGUARD", "Dashboard: http://localhost:{}", self.config.dashboard_port);

        self.monitor.start().await
    }

    /// Graceful shutdown, once the monitor has finished its last transaction
    pub async fn shutdown(&self) {
        info!(target: "WALLETGUARD", "Shutting down...");
        let stats = self.pipeline.get_stats();
        info!(
            target: "WALLETGUARD",
            "Processed {} transactions ({} flagged, {} alerts)",
            stats.transactions_processed,
            stats.transactions_flagged,
            stats.alerts_emitted
        );
        info!(target: "WALLETGUARD", "✅ Shutdown complete");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "WALLETGUARD", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "WALLETGUARD", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logger();

    let walletguard = match WalletGuard::new() {
        Ok(wg) => wg,
        Err(e) => {
            error!(target: "WALLETGUARD", "Failed to initialize: {:#}", e);
            return Err(e);
        }
    };

    // The signal only asks the monitor to stop; the transaction in flight
    // is finished and recorded before start() returns
    let monitor = walletguard.monitor.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(target: "WALLETGUARD", "Shutdown signal received");
        monitor.stop();
    });

    let result = walletguard.start().await;
    walletguard.shutdown().await;

    if let Err(e) = result {
        error!(target: "WALLETGUARD", "Fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
