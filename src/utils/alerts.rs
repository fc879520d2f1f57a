//! Alert service for Telegram, Discord and WebSocket notifications

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::types::{shorten_address, Alert, Category};
use crate::utils::RateLimiter;

const HISTORY_LIMIT: usize = 1000;
const DELIVERY_QUEUE: usize = 256;
const TELEGRAM: &str = "telegram";

/// An alert as recorded in history and pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub category: Category,
    pub title: String,
    pub subject: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub message: String,
    pub timestamp: i64,
    pub time: String,
    /// Set in history once Telegram or Discord accepted the alert
    pub delivered: bool,
}

/// Alert service: formats, records and broadcasts alerts, and queues them for
/// delivery.
///
/// Delivery runs on a background task so a slow or dead endpoint never holds
/// up the caller. Delivery failures are logged and never returned.
pub struct AlertService {
    limiter: Arc<RateLimiter>,
    alert_history: Arc<RwLock<VecDeque<AlertRecord>>>,
    alert_sender: broadcast::Sender<AlertRecord>,
    delivery_sender: Option<mpsc::Sender<AlertRecord>>,
    next_id: Arc<AtomicI64>,
}

impl AlertService {
    /// Create a new alert service.
    ///
    /// Starts the delivery task when Telegram or Discord is configured; this
    /// needs a running tokio runtime.
    pub fn new(config: Config) -> Self {
        let limiter = Arc::new(RateLimiter::new().with_daily_cap(TELEGRAM, config.telegram_daily_cap));
        let alert_history = Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)));
        let (alert_sender, _) = broadcast::channel(1000);

        let telegram_enabled = config.telegram_bot_token.is_some() && config.telegram_chat_id.is_some();
        let discord_enabled = config.discord_webhook_url.is_some();

        if telegram_enabled {
            info!(
                target: "ALERTS",
                "Telegram alerts enabled ({} per day)",
                config.telegram_daily_cap
            );
        }
        if discord_enabled {
            info!(target: "ALERTS", "Discord alerts enabled");
        }

        let delivery_sender = if telegram_enabled || discord_enabled {
            DeliveryWorker::spawn(config, Arc::clone(&limiter), Arc::clone(&alert_history))
        } else {
            None
        };

        Self {
            limiter,
            alert_history,
            alert_sender,
            delivery_sender,
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> broadcast::Receiver<AlertRecord> {
        self.alert_sender.subscribe()
    }

    /// Record, broadcast and queue one alert for delivery
    pub fn emit(&self, alert: &Alert) -> AlertRecord {
        let record = AlertRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            category: alert.category,
            title: alert.category.title().to_string(),
            subject: alert.subject.clone(),
            confidence: alert.confidence,
            reasons: alert.reasons.clone(),
            message: format_message(alert),
            timestamp: alert.timestamp,
            time: Utc
                .timestamp_opt(alert.timestamp, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            delivered: false,
        };

        {
            let mut history = self.alert_history.write();
            history.push_front(record.clone());
            history.truncate(HISTORY_LIMIT);
        }

        // Broadcast to subscribers
        let _ = self.alert_sender.send(record.clone());

        if let Some(sender) = &self.delivery_sender {
            if let Err(e) = sender.try_send(record.clone()) {
                warn!(target: "ALERTS", "Delivery queue unavailable, alert {} kept local: {}", record.id, e);
            }
        }

        record
    }

    /// Get recent alerts
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<AlertRecord> {
        let history = self.alert_history.read();
        history.iter().take(limit).cloned().collect()
    }

    /// Telegram messages sent in the current daily window
    pub fn telegram_sent_today(&self) -> u32 {
        self.limiter.daily_count(TELEGRAM)
    }
}

/// Background sender for Telegram and Discord
struct DeliveryWorker {
    config: Config,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    history: Arc<RwLock<VecDeque<AlertRecord>>>,
}

impl DeliveryWorker {
    fn spawn(
        config: Config,
        limiter: Arc<RateLimiter>,
        history: Arc<RwLock<VecDeque<AlertRecord>>>,
    ) -> Option<mpsc::Sender<AlertRecord>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "ALERTS", "No async runtime, alert delivery disabled");
            return None;
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.alert_delivery_timeout_secs.max(1)))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!(target: "ALERTS", "Failed to build HTTP client, alert delivery disabled: {}", e);
                return None;
            }
        };

        let (sender, receiver) = mpsc::channel(DELIVERY_QUEUE);
        let worker = Self {
            config,
            client,
            limiter,
            history,
        };
        runtime.spawn(worker.run(receiver));
        Some(sender)
    }

    async fn run(self, mut receiver: mpsc::Receiver<AlertRecord>) {
        while let Some(record) = receiver.recv().await {
            let telegram = self.send_telegram(&record).await;
            let discord = self.send_discord(&record).await;
            if telegram || discord {
                self.mark_delivered(record.id);
            }
        }
        debug!(target: "ALERTS", "Delivery queue closed");
    }

    fn mark_delivered(&self, id: i64) {
        let mut history = self.history.write();
        if let Some(record) = history.iter_mut().find(|r| r.id == id) {
            record.delivered = true;
        }
    }

    async fn send_telegram(&self, record: &AlertRecord) -> bool {
        let (Some(token), Some(chat_id)) = (&self.config.telegram_bot_token, &self.config.telegram_chat_id) else {
            return false;
        };

        if !self.limiter.allow(TELEGRAM, "daily", 0, record.timestamp) {
            warn!(
                target: "ALERTS",
                "Telegram daily cap of {} reached, alert {} kept local",
                self.config.telegram_daily_cap,
                record.id
            );
            return false;
        }

        let telegram_message = format!(
            "{} *{}*\n\n{}",
            get_emoji(record.category),
            record.title,
            record.message
        );

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.telegram_api_url.trim_end_matches('/'),
            token
        );
        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": telegram_message,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        match self.client.post(&url).json(&params).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                error!(target: "ALERTS", "Telegram rejected alert {}: {}", record.id, resp.status());
                false
            }
            Err(e) => {
                error!(target: "ALERTS", "Telegram send failed: {}", e);
                false
            }
        }
    }

    async fn send_discord(&self, record: &AlertRecord) -> bool {
        let Some(webhook) = &self.config.discord_webhook_url else {
            return false;
        };

        let payload = serde_json::json!({
            "embeds": [{
                "title": format!("{} {}", get_emoji(record.category), record.title),
                "description": record.message,
                "color": get_color(record.category),
                "footer": {"text": format!("WalletGuard • {}", record.time)},
            }]
        });

        match self.client.post(webhook).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                error!(target: "ALERTS", "Discord rejected alert {}: {}", record.id, resp.status());
                false
            }
            Err(e) => {
                error!(target: "ALERTS", "Discord send failed: {}", e);
                false
            }
        }
    }
}

fn get_emoji(category: Category) -> &'static str {
    match category {
        Category::Honeypot => "🍯",
        Category::Phishing => "🎣",
        Category::FlashLaunch => "🚀",
        Category::UnsellableToken => "🔒",
        Category::SybilCluster => "👥",
        Category::BridgeAbuse => "🌉",
        Category::FundObfuscation => "🌀",
        Category::SuspiciousActivity => "⚠️",
        Category::FakeCollection => "🖼️",
        Category::LargeTransfer => "💰",
        Category::HoneypotTransfer => "📤",
        Category::HoneypotSwap => "🔄",
        Category::TokenWorthless => "💸",
    }
}

/// Discord embed color
fn get_color(category: Category) -> u32 {
    match category {
        Category::HoneypotTransfer => 0xFFFF00,
        Category::HoneypotSwap => 0x3498DB,
        Category::TokenWorthless => 0x992D22,
        Category::LargeTransfer => 0x57F287,
        Category::SuspiciousActivity
        | Category::FlashLaunch
        | Category::UnsellableToken
        | Category::SybilCluster
        | Category::BridgeAbuse
        | Category::FundObfuscation => 0xFFA500,
        Category::Honeypot | Category::Phishing | Category::FakeCollection => 0xFF0000,
    }
}

fn format_message(alert: &Alert) -> String {
    let label = if alert.category.is_token_subject() {
        "Token"
    } else {
        "Address"
    };
    let reasons: String = alert.reasons.iter().map(|r| format!("\n• {}", r)).collect();

    format!(
        "{}: `{}` ({})\nConfidence: {:.0}%{}",
        label,
        alert.subject,
        shorten_address(&alert.subject, 4),
        alert.confidence * 100.0,
        reasons
    )
}

impl Clone for AlertService {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            alert_history: Arc::clone(&self.alert_history),
            alert_sender: self.alert_sender.clone(),
            delivery_sender: self.delivery_sender.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}
