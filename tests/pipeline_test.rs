use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walletguard::config::{Config, ProgramCatalog};
use walletguard::error::SettingsError;
use walletguard::lookup::{TokenDataSource, TokenSnapshot};
use walletguard::modules::ClassificationPipeline;
use walletguard::types::{Category, ClassifiedTransaction, Direction, TransactionEvent, WalletTransaction};
use walletguard::utils::{AlertRecord, AlertService, DatabaseService, MetricsService, PersistentSet};

const HONEY: &str = "HoneyMint1111111111111111111111111111111111";
const SLOW: &str = "SlowMint11111111111111111111111111111111111";
const DRAINER: &str = "DrainerAddr111111111111111111111111111111111";
const SENDER: &str = "SenderAddr1111111111111111111111111111111111";
const LOOKALIKE: &str = "LookalikeMint11111111111111111111111111111111";
const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const JUPITER: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";

#[derive(Default)]
struct StaticSource {
    snapshots: HashMap<String, TokenSnapshot>,
    slow: HashSet<String>,
    calls: AtomicUsize,
}

impl TokenDataSource for StaticSource {
    async fn token_snapshot(&self, mint: &str) -> TokenSnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.contains(mint) {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        self.snapshots.get(mint).cloned().unwrap_or_default()
    }
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    source: Arc<StaticSource>,
    pipeline: ClassificationPipeline<StaticSource>,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(configure: impl FnOnce(&mut Config)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = Config::offline(dir.path());
    config.lookup_timeout_ms = 50;
    configure(&mut config);

    let mut source = StaticSource::default();
    source.snapshots.insert(
        HONEY.to_string(),
        TokenSnapshot {
            price_usd: Some(0.0),
            has_metadata: Some(false),
            holder_count: Some(500),
            ..Default::default()
        },
    );
    source.snapshots.insert(
        LOOKALIKE.to_string(),
        TokenSnapshot {
            price_usd: Some(0.02),
            has_metadata: Some(true),
            holder_count: Some(40),
            name: Some("Mad Lad".to_string()),
            symbol: Some("MADL".to_string()),
            ..Default::default()
        },
    );
    source.slow.insert(SLOW.to_string());
    let source = Arc::new(source);

    let pipeline = ClassificationPipeline::new(
        &config,
        Arc::clone(&source),
        Arc::new(ProgramCatalog::default()),
        AlertService::new(config.clone()),
        MetricsService::new().unwrap(),
        DatabaseService::new(config.database_file()).unwrap(),
    )
    .unwrap();

    Fixture {
        _dir: dir,
        config,
        source,
        pipeline,
    }
}

fn token_in(signature: &str, mint: &str, at: i64) -> WalletTransaction {
    WalletTransaction {
        signature: signature.to_string(),
        block_time: at,
        events: vec![TransactionEvent::token_transfer(Direction::Incoming, 1000.0, SENDER, mint)],
        ..Default::default()
    }
}

fn alerts_of(fx: &Fixture, category: Category) -> Vec<AlertRecord> {
    fx.pipeline
        .alerts()
        .get_recent_alerts(100)
        .into_iter()
        .filter(|a| a.category == category)
        .collect()
}

fn verdict(classified: &ClassifiedTransaction, category: Category) -> &walletguard::types::ClassificationVerdict {
    classified
        .verdicts
        .iter()
        .find(|v| v.category == category)
        .unwrap()
}

#[tokio::test]
async fn test_honeypot_flagged_and_alert_cooled_down() {
    let fx = fixture();

    let first = fx.pipeline.process(token_in("sig-1", HONEY, 1_000)).await.unwrap();
    let honeypot = verdict(&first, Category::Honeypot);
    assert!(honeypot.flagged);
    assert!((honeypot.confidence - 0.5).abs() < 1e-9);
    // The honeypot alert plus the zero-price notice
    assert_eq!(fx.pipeline.get_stats().alerts_emitted, 2);

    // Now a known honeypot, but still inside the cooldown
    let second = fx.pipeline.process(token_in("sig-2", HONEY, 1_010)).await.unwrap();
    let honeypot = verdict(&second, Category::Honeypot);
    assert!(honeypot.flagged);
    assert_eq!(honeypot.confidence, 1.0);
    assert_eq!(fx.pipeline.get_stats().alerts_emitted, 2);

    let alerts = alerts_of(&fx, Category::Honeypot);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].subject, HONEY);
    assert!(!alerts[0].delivered);
    assert_eq!(alerts_of(&fx, Category::TokenWorthless).len(), 1);

    let stored = fx.pipeline.database().get_recent_alerts(10).unwrap();
    assert_eq!(stored.iter().filter(|a| a.category == "honeypot").count(), 1);

    // Past the honeypot cooldown the alert fires again; the worthless
    // notice stays quiet for a day
    fx.pipeline.process(token_in("sig-3", HONEY, 1_000 + 3_600)).await.unwrap();
    assert_eq!(alerts_of(&fx, Category::Honeypot).len(), 2);
    assert_eq!(alerts_of(&fx, Category::TokenWorthless).len(), 1);

    let metrics = fx.pipeline.metrics().get_metrics().unwrap();
    assert!(metrics.contains("walletguard_alerts_suppressed_total{category=\"honeypot\"} 1"));

    let reloaded = PersistentSet::load("honeypots", fx.config.honeypot_file());
    assert!(reloaded.contains(HONEY).unwrap());
}

#[tokio::test]
async fn test_approval_then_drain_promotes_phishing() {
    let fx = fixture();

    let approval = WalletTransaction {
        signature: "approve".to_string(),
        block_time: 2_000,
        events: vec![TransactionEvent::token_approval(DRAINER, Some("UsdcLikeMint"))],
        ..Default::default()
    };
    let first = fx.pipeline.process(approval).await.unwrap();
    let phishing = verdict(&first, Category::Phishing);
    assert!(!phishing.flagged);
    assert_eq!(phishing.subject, DRAINER);

    let drain = WalletTransaction {
        signature: "drain".to_string(),
        block_time: 2_060,
        events: vec![TransactionEvent::token_transfer(
            Direction::Outgoing,
            500.0,
            DRAINER,
            "UsdcLikeMint",
        )],
        ..Default::default()
    };
    let second = fx.pipeline.process(drain).await.unwrap();
    let phishing = verdict(&second, Category::Phishing);
    assert!(phishing.flagged);
    assert!((phishing.confidence - 0.9).abs() < 1e-9);
    assert!(fx.pipeline.phishing().is_phishing_address(DRAINER).unwrap());

    // Any later contact with the drainer is flagged outright
    let contact = WalletTransaction {
        signature: "contact".to_string(),
        block_time: 2_120,
        events: vec![TransactionEvent::sol_transfer(Direction::Incoming, 0.001, DRAINER)],
        ..Default::default()
    };
    let third = fx.pipeline.process(contact).await.unwrap();
    let phishing = verdict(&third, Category::Phishing);
    assert!(phishing.flagged);
    assert_eq!(phishing.confidence, 1.0);

    let phishing_alerts: Vec<_> = fx
        .pipeline
        .alerts()
        .get_recent_alerts(10)
        .into_iter()
        .filter(|a| a.category == Category::Phishing)
        .collect();
    assert_eq!(phishing_alerts.len(), 1);
}

#[tokio::test]
async fn test_whitelist_clears_known_honeypot() {
    let fx = fixture();

    fx.pipeline.process(token_in("sig-1", HONEY, 1_000)).await.unwrap();
    assert!(fx.pipeline.honeypot().is_honeypot(HONEY).unwrap());

    assert!(fx.pipeline.whitelist(HONEY).unwrap());
    assert!(!fx.pipeline.honeypot().is_honeypot(HONEY).unwrap());

    let after = fx.pipeline.process(token_in("sig-2", HONEY, 1_010)).await.unwrap();
    let honeypot = verdict(&after, Category::Honeypot);
    assert!(!honeypot.flagged);
    assert_eq!(honeypot.confidence, 0.0);

    let whitelist = PersistentSet::load("whitelist", fx.config.whitelist_file());
    assert!(whitelist.contains(HONEY).unwrap());
    let honeypots = PersistentSet::load("honeypots", fx.config.honeypot_file());
    assert!(!honeypots.contains(HONEY).unwrap());
}

#[tokio::test]
async fn test_runtime_settings_apply_to_next_transaction() {
    let fx = fixture();

    fx.pipeline
        .apply_setting("honeypot_confidence_threshold", 0.6)
        .unwrap();
    let classified = fx.pipeline.process(token_in("sig-1", HONEY, 1_000)).await.unwrap();
    let honeypot = verdict(&classified, Category::Honeypot);
    assert!(!honeypot.flagged);
    assert!((honeypot.confidence - 0.5).abs() < 1e-9);

    assert!(matches!(
        fx.pipeline.apply_setting("no_such_setting", 1.0),
        Err(SettingsError::UnknownKey(_))
    ));
    assert!(matches!(
        fx.pipeline.apply_setting("rapid_window", -1.0),
        Err(SettingsError::InvalidValue { .. })
    ));
    assert_eq!(
        fx.pipeline.settings().snapshot().unwrap().honeypot_confidence_threshold,
        0.6
    );
}

#[tokio::test]
async fn test_slow_lookup_times_out_as_unknown() {
    let fx = fixture();

    let started = std::time::Instant::now();
    let classified = fx.pipeline.process(token_in("sig-slow", SLOW, 1_000)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(fx.source.calls.load(Ordering::SeqCst), 1);

    let honeypot = verdict(&classified, Category::Honeypot);
    assert!(!honeypot.flagged);
    assert_eq!(honeypot.confidence, 0.0);

    let metrics = fx.pipeline.metrics().get_metrics().unwrap();
    assert!(metrics.contains("walletguard_lookup_failures_total{source=\"timeout\"} 1"));
}

#[tokio::test]
async fn test_batch_is_recorded_in_order() {
    let fx = fixture();

    let results = fx
        .pipeline
        .process_batch(vec![
            token_in("sig-a", "PlainMint", 1_000),
            token_in("sig-b", HONEY, 1_001),
        ])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(!results[0].is_flagged());
    assert!(results[1].is_flagged());

    let database = fx.pipeline.database();
    assert!(database.is_processed("sig-a").unwrap());
    assert!(!database.is_processed("sig-c").unwrap());

    let flagged = database.recent_transactions(10, true).unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].signature, "sig-b");

    let stats = fx.pipeline.get_stats();
    assert_eq!(stats.transactions_processed, 2);
    assert_eq!(stats.transactions_flagged, 1);
}

#[tokio::test]
async fn test_large_transfer_and_honeypot_swap_notices() {
    let fx = fixture();

    let payout = WalletTransaction {
        signature: "payout".to_string(),
        block_time: 3_000,
        events: vec![
            TransactionEvent::sol_transfer(Direction::Outgoing, 2.5, SENDER),
            TransactionEvent::token_transfer(Direction::Incoming, 150.0, SENDER, USDC),
        ],
        ..Default::default()
    };
    let classified = fx.pipeline.process(payout).await.unwrap();
    let large: Vec<_> = classified
        .flagged()
        .filter(|v| v.category == Category::LargeTransfer)
        .map(|v| v.subject.as_str())
        .collect();
    assert_eq!(large, vec!["SOL", "USDC"]);
    assert_eq!(alerts_of(&fx, Category::LargeTransfer).len(), 2);

    let dump = WalletTransaction {
        signature: "dump".to_string(),
        block_time: 3_010,
        events: vec![TransactionEvent::token_transfer(Direction::Outgoing, 1000.0, SENDER, HONEY)],
        program_ids: vec![JUPITER.to_string()],
        ..Default::default()
    };
    let classified = fx.pipeline.process(dump).await.unwrap();
    assert!(verdict(&classified, Category::Honeypot).flagged);
    for category in [Category::HoneypotTransfer, Category::HoneypotSwap, Category::TokenWorthless] {
        let notice = verdict(&classified, category);
        assert!(notice.flagged);
        assert_eq!(notice.subject, HONEY);
        assert_eq!(alerts_of(&fx, category).len(), 1);
    }
    assert!(alerts_of(&fx, Category::HoneypotSwap)[0].message.contains("Token"));
    assert_eq!(fx.pipeline.get_stats().transfers.large_transfers, 2);
}

#[tokio::test]
async fn test_lookalike_collection_flagged_on_arrival() {
    let fx = fixture();

    let classified = fx.pipeline.process(token_in("nft", LOOKALIKE, 4_000)).await.unwrap();
    let fake = verdict(&classified, Category::FakeCollection);
    assert!(fake.flagged);
    assert_eq!(fake.subject, LOOKALIKE);
    assert!(fake.reasons[0].contains("Mad Lads"));

    let alerts = alerts_of(&fx, Category::FakeCollection);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].title, "Fake NFT Collection");

    // Whitelisting the mint silences it
    fx.pipeline.whitelist(LOOKALIKE).unwrap();
    let classified = fx.pipeline.process(token_in("nft-2", LOOKALIKE, 4_010)).await.unwrap();
    assert!(classified.verdicts.iter().all(|v| v.category != Category::FakeCollection));
}

#[tokio::test]
async fn test_token_info_combines_lookup_and_state() {
    let fx = fixture();
    fx.pipeline.process(token_in("sig-1", HONEY, 1_000)).await.unwrap();

    let info = fx.pipeline.token_info(HONEY).await.unwrap();
    assert!(info.is_honeypot);
    assert!(!info.is_whitelisted);
    assert!(!info.is_known_token);
    assert_eq!(info.price_usd, Some(0.0));
    assert_eq!(info.holder_count, Some(500));

    let info = fx.pipeline.token_info(LOOKALIKE).await.unwrap();
    assert_eq!(info.name.as_deref(), Some("Mad Lad"));
    assert_eq!(info.symbol.as_deref(), Some("MADL"));

    let json = serde_json::to_value(fx.pipeline.token_info(USDC).await.unwrap()).unwrap();
    assert_eq!(json["isKnownToken"], true);
    assert_eq!(json["isHoneypot"], false);
}

#[tokio::test]
async fn test_stalled_alert_endpoint_does_not_hold_up_processing() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let fx = fixture_with(|config| {
        config.telegram_bot_token = Some("token".to_string());
        config.telegram_chat_id = Some("chat".to_string());
        config.telegram_api_url = format!("http://{}", addr);
    });

    for (i, at) in [1_000, 1_010, 1_020].into_iter().enumerate() {
        let tx = token_in(&format!("sig-{}", i), HONEY, at);
        tokio::time::timeout(Duration::from_secs(2), fx.pipeline.process(tx))
            .await
            .expect("process blocked on alert delivery")
            .unwrap();
    }

    let alerts = alerts_of(&fx, Category::Honeypot);
    assert_eq!(alerts.len(), 1);
    assert!(!alerts[0].delivered);
    assert!(fx.pipeline.database().is_processed("sig-2").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_stay_available_while_ingesting() {
    let fx = fixture();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let pipeline = fx.pipeline.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) {
                let stats = pipeline.get_stats();
                assert!(stats.transactions_flagged <= stats.transactions_processed);
                pipeline.honeypot().is_honeypot(HONEY).unwrap();
                pipeline.settings().snapshot().unwrap();
                pipeline.database().recent_transactions(10, false).unwrap();
                let _ = pipeline.alerts().get_recent_alerts(10);
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    let ingest = {
        let pipeline = fx.pipeline.clone();
        tokio::spawn(async move {
            for i in 0..40i64 {
                let mint = if i % 2 == 0 { HONEY } else { "PlainMint" };
                pipeline
                    .process(token_in(&format!("sig-{}", i), mint, 1_000 + i))
                    .await
                    .unwrap();
            }
        })
    };

    ingest.await.unwrap();
    done.store(true, Ordering::SeqCst);
    let reads = reader.await.unwrap();
    assert!(reads > 0);

    let stats = fx.pipeline.get_stats();
    assert_eq!(stats.transactions_processed, 40);
    assert_eq!(fx.pipeline.database().recent_transactions(100, false).unwrap().len(), 40);
}
