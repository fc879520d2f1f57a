//! Solana RPC service for WalletGuard (read-only, no wallet keys)

use anyhow::{Context, Result};
use solana_account_decoder::{UiAccountEncoding, UiDataSliceConfig};
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::future::Future;
use std::time::Instant;
use std::{str::FromStr, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ProgramCatalog};
use crate::lookup::{TokenDataSource, TokenSnapshot};
use crate::types::WalletTransaction;
use crate::utils::decoder::decode_transaction;
use crate::utils::MetricsService;

const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const METADATA_PROGRAM_ID: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";
const TOKEN_ACCOUNT_SIZE: u64 = 165;
/// Metaplex metadata: key (1) + update authority (32) + mint (32)
const METADATA_NAME_OFFSET: usize = 65;
/// `getSignaturesForAddress` page size; a full page means the first
/// signature is out of reach
const SIGNATURE_PAGE: usize = 1000;

/// Log notification mentioning the monitored wallet
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub signature: String,
    pub failed: bool,
}

/// Solana service for RPC interactions
pub struct SolanaService {
    pub client: Arc<RpcClient>,
    pub wallet: Pubkey,
    config: Config,
    catalog: Arc<ProgramCatalog>,
    metrics: MetricsService,
    http: reqwest::Client,
    log_sender: broadcast::Sender<LogEvent>,
}

impl SolanaService {
    /// Create a new Solana service
    pub fn new(config: Config, catalog: Arc<ProgramCatalog>, metrics: MetricsService) -> Result<Self> {
        let client = Arc::new(RpcClient::new_with_commitment(
            config.rpc_url.clone(),
            CommitmentConfig::confirmed(),
        ));

        let wallet = Pubkey::from_str(&config.wallet_address)
            .with_context(|| format!("invalid WALLET_ADDRESS {:?}", config.wallet_address))?;

        let (log_sender, _) = broadcast::channel(1000);

        info!(target: "SOLANA", "Connected to Solana RPC (monitor-only mode)");

        Ok(Self {
            client,
            wallet,
            config,
            catalog,
            metrics,
            http: reqwest::Client::new(),
            log_sender,
        })
    }

    /// Get a receiver for log events
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.log_sender.subscribe()
    }

    /// Start the WebSocket log subscription for transactions mentioning the wallet
    pub async fn start_log_subscription(&self) -> Result<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        let ws_url = self.config.ws_url.clone();
        let wallet = self.wallet.to_string();
        let sender = self.log_sender.clone();
        let metrics = self.metrics.clone();

        // Spawn WebSocket connection handler
        tokio::spawn(async move {
            loop {
                match connect_async(&ws_url).await {
                    Ok((mut ws_stream, _)) => {
                        info!(target: "SOLANA", "WebSocket connected to {}", ws_url);

                        let subscribe_msg = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": 1,
                            "method": "logsSubscribe",
                            "params": [
                                {"mentions": [wallet]},
                                {"commitment": "confirmed"}
                            ]
                        });

                        if let Err(e) = ws_stream.send(Message::Text(subscribe_msg.to_string())).await {
                            error!(target: "SOLANA", "Failed to send subscribe message: {}", e);
                            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                            continue;
                        }

                        metrics.websocket_connected.set(1.0);
                        info!(target: "SOLANA", "Subscribed to wallet logs");

                        while let Some(msg) = ws_stream.next().await {
                            match msg {
                                Ok(Message::Text(text)) => {
                                    if let Some(event) = parse_log_notification(&text) {
                                        let _ = sender.send(event);
                                    }
                                }
                                Ok(Message::Ping(data)) => {
                                    let _ = ws_stream.send(Message::Pong(data)).await;
                                }
                                Ok(Message::Close(_)) => {
                                    warn!(target: "SOLANA", "WebSocket closed, reconnecting...");
                                    break;
                                }
                                Err(e) => {
                                    error!(target: "SOLANA", "WebSocket error: {}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                        metrics.websocket_connected.set(0.0);
                    }
                    Err(e) => {
                        error!(target: "SOLANA", "Failed to connect WebSocket: {}", e);
                    }
                }

                // Wait before reconnecting
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                info!(target: "SOLANA", "Reconnecting WebSocket...");
            }
        });

        Ok(())
    }

    async fn timed<T, E, F>(&self, method: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics
            .record_rpc(method, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    /// Most recent signatures for the wallet, newest first
    pub async fn get_recent_signatures(&self, limit: usize) -> Result<Vec<String>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
            ..Default::default()
        };
        let statuses = self
            .timed(
                "getSignaturesForAddress",
                self.client
                    .get_signatures_for_address_with_config(&self.wallet, config),
            )
            .await?;
        Ok(statuses.into_iter().map(|s| s.signature).collect())
    }

    /// Get a parsed transaction by signature with retry logic
    pub async fn get_transaction(&self, signature: &str) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>> {
        let sig = Signature::from_str(signature)?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        // Retry with exponential backoff for rate limiting
        let mut attempts = 0;
        let max_attempts = 3;
        let mut delay_ms = 500;

        loop {
            match self
                .timed("getTransaction", self.client.get_transaction_with_config(&sig, config.clone()))
                .await
            {
                Ok(tx) => return Ok(Some(tx)),
                Err(e) => {
                    let error_str = e.to_string();

                    // Check if rate limited (429)
                    if error_str.contains("429") && attempts < max_attempts {
                        attempts += 1;
                        warn!(target: "SOLANA", "Rate limited, retrying in {}ms (attempt {}/{})", delay_ms, attempts, max_attempts);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                        delay_ms *= 2; // Exponential backoff
                        continue;
                    }

                    warn!(target: "SOLANA", "Failed to get transaction {}: {}", signature, e);
                    return Ok(None);
                }
            }
        }
    }

    /// Fetch and decode one transaction from the wallet's point of view
    pub async fn fetch_wallet_transaction(&self, signature: &str) -> Result<Option<WalletTransaction>> {
        let Some(encoded) = self.get_transaction(signature).await? else {
            return Ok(None);
        };
        let raw = serde_json::to_value(&encoded)?;
        let decoded = decode_transaction(&raw, &self.config.wallet_address, &self.catalog);
        if decoded.is_none() {
            warn!(target: "SOLANA", "Could not decode transaction {}", signature);
        }
        Ok(decoded)
    }

    /// Get account balance in SOL
    pub async fn get_balance(&self, pubkey: &str) -> Result<f64> {
        let pubkey = Pubkey::from_str(pubkey)?;
        let balance = self.timed("getBalance", self.client.get_balance(&pubkey)).await?;
        Ok(balance as f64 / 1_000_000_000.0)
    }

    /// Number of token accounts holding `mint`
    async fn holder_count(&self, mint: &Pubkey) -> Option<u64> {
        let token_program = Pubkey::from_str(TOKEN_PROGRAM_ID).ok()?;
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(TOKEN_ACCOUNT_SIZE),
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(0, mint.as_ref())),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                data_slice: Some(UiDataSliceConfig { offset: 0, length: 0 }),
                ..Default::default()
            },
            ..Default::default()
        };

        match self
            .timed(
                "getProgramAccounts",
                self.client.get_program_accounts_with_config(&token_program, config),
            )
            .await
        {
            Ok(accounts) => Some(accounts.len() as u64),
            Err(e) => {
                debug!(target: "SOLANA", "Holder lookup failed for {}: {}", mint, e);
                None
            }
        }
    }

    /// Metaplex metadata for `mint`: `None` when the lookup failed,
    /// `Some(None)` when no metadata account exists
    async fn metadata(&self, mint: &Pubkey) -> Option<Option<(String, String)>> {
        let metadata_program = Pubkey::from_str(METADATA_PROGRAM_ID).ok()?;
        let seeds: &[&[u8]] = &[b"metadata", metadata_program.as_ref(), mint.as_ref()];
        let (pda, _) = Pubkey::find_program_address(seeds, &metadata_program);

        match self
            .timed(
                "getAccountInfo",
                self.client
                    .get_account_with_commitment(&pda, CommitmentConfig::confirmed()),
            )
            .await
        {
            Ok(response) => Some(response.value.map(|account| {
                parse_metadata_names(&account.data).unwrap_or_default()
            })),
            Err(e) => {
                debug!(target: "SOLANA", "Metadata lookup failed for {}: {}", mint, e);
                None
            }
        }
    }

    /// Mint authority from the raw mint account (`COption<Pubkey>` at offset 0)
    async fn mint_authority(&self, mint: &Pubkey) -> Option<String> {
        let response = self
            .timed(
                "getAccountInfo",
                self.client
                    .get_account_with_commitment(mint, CommitmentConfig::confirmed()),
            )
            .await
            .ok()?;
        let data = response.value?.data;
        if data.len() < 36 || data[0..4] != [1, 0, 0, 0] {
            return None;
        }
        Pubkey::try_from(&data[4..36]).ok().map(|p| p.to_string())
    }

    /// Block time of the mint's first transaction, when it is within one page
    async fn creation_time(&self, mint: &Pubkey) -> Option<i64> {
        let statuses = self
            .timed(
                "getSignaturesForAddress",
                self.client.get_signatures_for_address(mint),
            )
            .await
            .ok()?;
        if statuses.len() >= SIGNATURE_PAGE {
            return None;
        }
        statuses.last().and_then(|s| s.block_time)
    }

    /// USD price from Moralis; unknown without an API key
    async fn price_usd(&self, mint: &str) -> Option<f64> {
        let api_key = self.config.moralis_api_key.as_ref()?;
        let url = format!("https://solana-gateway.moralis.io/token/mainnet/{}/price", mint);

        let started = Instant::now();
        let response = self
            .http
            .get(&url)
            .header("accept", "application/json")
            .header("X-API-Key", api_key)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;
        self.metrics
            .record_rpc("moralisPrice", response.is_ok(), started.elapsed().as_secs_f64());

        let response = response.ok()?;
        if !response.status().is_success() {
            debug!(target: "SOLANA", "No Moralis price for {}: {}", mint, response.status());
            return None;
        }
        let body: serde_json::Value = response.json().await.ok()?;
        body.get("usdPrice").and_then(|p| p.as_f64())
    }
}

impl TokenDataSource for SolanaService {
    async fn token_snapshot(&self, mint: &str) -> TokenSnapshot {
        let Ok(pubkey) = Pubkey::from_str(mint) else {
            return TokenSnapshot::unknown();
        };

        let (price_usd, metadata, holder_count, creator, created_at) = tokio::join!(
            self.price_usd(mint),
            self.metadata(&pubkey),
            self.holder_count(&pubkey),
            self.mint_authority(&pubkey),
            self.creation_time(&pubkey),
        );

        let has_metadata = metadata.as_ref().map(Option::is_some);
        let (name, symbol) = metadata.flatten().unwrap_or_default();

        TokenSnapshot {
            price_usd,
            has_metadata,
            holder_count,
            creator,
            created_at,
            name: Some(name).filter(|n| !n.is_empty()),
            symbol: Some(symbol).filter(|s| !s.is_empty()),
        }
    }
}

/// Name and symbol from a Metaplex metadata account. Both are borsh strings
/// (u32 LE length, then bytes) padded with NULs.
pub fn parse_metadata_names(data: &[u8]) -> Option<(String, String)> {
    fn borsh_string(data: &[u8], offset: usize) -> Option<(String, usize)> {
        let len_bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = offset + 4;
        let bytes = data.get(start..start + len)?;
        let text = String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string();
        Some((text, start + len))
    }

    let (name, next) = borsh_string(data, METADATA_NAME_OFFSET)?;
    let (symbol, _) = borsh_string(data, next)?;
    Some((name, symbol))
}

/// Extract the signature from a `logsNotification` frame
pub fn parse_log_notification(text: &str) -> Option<LogEvent> {
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    let value = json.get("params")?.get("result")?.get("value")?;
    let signature = value.get("signature")?.as_str()?;
    if signature.is_empty() {
        return None;
    }
    Some(LogEvent {
        signature: signature.to_string(),
        failed: value.get("err").map_or(false, |e| !e.is_null()),
    })
}

impl Clone for SolanaService {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            wallet: self.wallet,
            config: self.config.clone(),
            catalog: Arc::clone(&self.catalog),
            metrics: self.metrics.clone(),
            http: self.http.clone(),
            log_sender: self.log_sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_notification() {
        let frame = r#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{"context":{"slot":1},"value":{"signature":"5ig","err":null,"logs":[]}},"subscription":7}}"#;
        let event = parse_log_notification(frame).unwrap();
        assert_eq!(event.signature, "5ig");
        assert!(!event.failed);

        // Subscription confirmations carry no signature
        assert!(parse_log_notification(r#"{"jsonrpc":"2.0","result":7,"id":1}"#).is_none());
    }

    fn borsh(text: &str, padded: usize) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(padded, 0);
        let mut out = (padded as u32).to_le_bytes().to_vec();
        out.extend(bytes);
        out
    }

    #[test]
    fn test_parse_metadata_names() {
        let mut data = vec![4u8; METADATA_NAME_OFFSET];
        data.extend(borsh("Mad Lads", 32));
        data.extend(borsh("MAD", 10));
        data.extend(borsh("https://example.invalid/1.json", 200));

        assert_eq!(
            parse_metadata_names(&data),
            Some(("Mad Lads".to_string(), "MAD".to_string()))
        );

        // Truncated account
        assert_eq!(parse_metadata_names(&data[..METADATA_NAME_OFFSET + 10]), None);
    }
}
