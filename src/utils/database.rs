//! SQLite history of classified transactions and emitted alerts

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::types::{ClassificationVerdict, ClassifiedTransaction};
use crate::utils::alerts::AlertRecord;

/// Classified transaction as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub signature: String,
    pub block_time: i64,
    pub account: Option<String>,
    pub flagged: bool,
    pub verdicts: Vec<ClassificationVerdict>,
    pub processed_at: String,
}

/// Alert history row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAlert {
    pub id: i64,
    pub category: String,
    pub subject: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub timestamp: i64,
    pub delivered: bool,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub transactions: i64,
    pub flagged_transactions: i64,
    pub alerts: i64,
}

/// SQLite database service
pub struct DatabaseService {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseService {
    /// Create a new database service
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Database that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let service = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        service.initialize()?;
        Ok(service)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                signature TEXT PRIMARY KEY,
                block_time INTEGER,
                account TEXT,
                flagged INTEGER DEFAULT 0,
                verdicts TEXT,
                processed_at TEXT
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT,
                subject TEXT,
                confidence REAL,
                reasons TEXT,
                timestamp INTEGER,
                delivered INTEGER DEFAULT 0
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tx_block_time ON transactions(block_time)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_subject ON alerts(subject)",
            [],
        )?;

        info!(target: "DATABASE", "Initialized successfully");
        Ok(())
    }

    // ============================================
    // TRANSACTION METHODS
    // ============================================

    pub fn is_processed(&self, signature: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM transactions WHERE signature = ?",
                params![signature],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn save_classified(&self, classified: &ClassifiedTransaction) -> Result<()> {
        let tx = &classified.transaction;
        let verdicts = serde_json::to_string(&classified.verdicts)?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO transactions
            (signature, block_time, account, flagged, verdicts, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                tx.signature,
                tx.block_time,
                tx.account,
                classified.is_flagged() as i32,
                verdicts,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_transactions(&self, limit: i64, flagged_only: bool) -> Result<Vec<TransactionRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT signature, block_time, account, flagged, verdicts, processed_at
            FROM transactions
            WHERE flagged >= ?1
            ORDER BY block_time DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![flagged_only as i32, limit], |row| {
            let verdicts: String = row.get(4)?;
            Ok(TransactionRow {
                signature: row.get(0)?,
                block_time: row.get(1)?,
                account: row.get(2)?,
                flagged: row.get::<_, i32>(3)? != 0,
                verdicts: serde_json::from_str(&verdicts).unwrap_or_default(),
                processed_at: row.get(5)?,
            })
        })?;

        let mut txs = Vec::new();
        for row in rows {
            txs.push(row?);
        }
        Ok(txs)
    }

    // ============================================
    // ALERT METHODS
    // ============================================

    pub fn save_alert(&self, alert: &AlertRecord) -> Result<()> {
        let reasons = serde_json::to_string(&alert.reasons)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO alerts (category, subject, confidence, reasons, timestamp, delivered)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                alert.category.as_str(),
                alert.subject,
                alert.confidence,
                reasons,
                alert.timestamp,
                alert.delivered as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get_recent_alerts(&self, limit: i64) -> Result<Vec<StoredAlert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, category, subject, confidence, reasons, timestamp, delivered
            FROM alerts ORDER BY timestamp DESC, id DESC LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let reasons: String = row.get(4)?;
            Ok(StoredAlert {
                id: row.get(0)?,
                category: row.get(1)?,
                subject: row.get(2)?,
                confidence: row.get(3)?,
                reasons: serde_json::from_str(&reasons).unwrap_or_default(),
                timestamp: row.get(5)?,
                delivered: row.get::<_, i32>(6)? != 0,
            })
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    // ============================================
    // STATS
    // ============================================

    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.conn.lock();

        let transactions: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

        let flagged_transactions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE flagged = 1",
            [],
            |row| row.get(0),
        )?;

        let alerts: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;

        Ok(DbStats {
            transactions,
            flagged_transactions,
            alerts,
        })
    }
}

impl Clone for DatabaseService {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, WalletTransaction};
    use tempfile::TempDir;

    fn classified(signature: &str, block_time: i64, flagged: bool) -> ClassifiedTransaction {
        let verdict = if flagged {
            ClassificationVerdict::flagged(Category::Phishing, "addr", 0.9, vec!["memo".into()])
        } else {
            ClassificationVerdict::clear(Category::Phishing, "addr", 0.0, vec![])
        };
        ClassifiedTransaction {
            transaction: WalletTransaction {
                signature: signature.to_string(),
                block_time,
                ..Default::default()
            },
            verdicts: vec![verdict],
        }
    }

    #[test]
    fn test_processed_signatures_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("walletguard.db");

        let db = DatabaseService::new(&path).unwrap();
        assert!(!db.is_processed("sig1").unwrap());
        db.save_classified(&classified("sig1", 100, false)).unwrap();
        // Duplicate insert is ignored
        db.save_classified(&classified("sig1", 100, true)).unwrap();
        drop(db);

        let db = DatabaseService::new(&path).unwrap();
        assert!(db.is_processed("sig1").unwrap());
        assert_eq!(db.get_stats().unwrap().transactions, 1);
        assert_eq!(db.get_stats().unwrap().flagged_transactions, 0);
    }

    #[test]
    fn test_recent_transactions_filter_and_order() {
        let db = DatabaseService::in_memory().unwrap();
        db.save_classified(&classified("a", 100, false)).unwrap();
        db.save_classified(&classified("b", 200, true)).unwrap();
        db.save_classified(&classified("c", 300, false)).unwrap();

        let all = db.recent_transactions(10, false).unwrap();
        assert_eq!(
            all.iter().map(|r| r.signature.as_str()).collect::<Vec<_>>(),
            vec!["c", "b", "a"]
        );

        let flagged = db.recent_transactions(10, true).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].verdicts[0].confidence, 0.9);
    }

    #[test]
    fn test_alert_history() {
        let db = DatabaseService::in_memory().unwrap();
        let record = AlertRecord {
            id: 1,
            category: Category::Honeypot,
            title: Category::Honeypot.title().to_string(),
            subject: "mint".into(),
            confidence: 0.75,
            reasons: vec!["Token has zero price".into()],
            message: String::new(),
            timestamp: 1000,
            time: String::new(),
            delivered: false,
        };
        db.save_alert(&record).unwrap();

        let alerts = db.get_recent_alerts(5).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "honeypot");
        assert_eq!(alerts[0].reasons, vec!["Token has zero price".to_string()]);
    }
}
