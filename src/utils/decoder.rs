//! Decodes `jsonParsed` transactions into [`WalletTransaction`]s seen from
//! the monitored wallet

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::config::ProgramCatalog;
use crate::types::{Direction, EventKind, TransactionEvent, WalletTransaction};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const DEFAULT_DECIMALS: u8 = 6;

/// Owner and mint of a token account, from the transaction's token balances
#[derive(Debug, Clone)]
struct TokenAccount {
    owner: Option<String>,
    mint: String,
    decimals: u8,
}

struct Context<'a> {
    wallet: &'a str,
    catalog: &'a ProgramCatalog,
    token_accounts: HashMap<String, TokenAccount>,
}

impl Context<'_> {
    fn owner_of(&self, account: &str) -> String {
        self.token_accounts
            .get(account)
            .and_then(|t| t.owner.clone())
            .unwrap_or_else(|| account.to_string())
    }

    fn mint_of(&self, info: &Value, accounts: &[&str]) -> Option<String> {
        str_field(info, "mint").map(String::from).or_else(|| {
            accounts
                .iter()
                .find_map(|a| self.token_accounts.get(*a).map(|t| t.mint.clone()))
        })
    }

    fn decimals_of(&self, mint: &str, accounts: &[&str]) -> u8 {
        accounts
            .iter()
            .find_map(|a| self.token_accounts.get(*a).map(|t| t.decimals))
            .or_else(|| self.catalog.token_decimals(mint))
            .unwrap_or(DEFAULT_DECIMALS)
    }
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

/// Token amount from either a raw `amount` or a `tokenAmount` object
fn token_amount(info: &Value, decimals: u8) -> f64 {
    if let Some(ui) = info
        .get("tokenAmount")
        .and_then(|t| t.get("uiAmount"))
        .and_then(Value::as_f64)
    {
        return ui;
    }
    let raw = match info.get("amount") {
        Some(Value::String(s)) => s.parse::<f64>().unwrap_or(0.0),
        Some(v) => v.as_f64().unwrap_or(0.0),
        None => 0.0,
    };
    raw / 10f64.powi(decimals as i32)
}

fn account_keys(message: &Value) -> Vec<String> {
    message
        .get("accountKeys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(|k| match k {
                    Value::String(s) => Some(s.clone()),
                    other => str_field(other, "pubkey").map(String::from),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn token_accounts(meta: &Value, keys: &[String]) -> HashMap<String, TokenAccount> {
    let mut accounts = HashMap::new();
    for field in ["preTokenBalances", "postTokenBalances"] {
        let Some(balances) = meta.get(field).and_then(Value::as_array) else {
            continue;
        };
        for balance in balances {
            let Some(key) = balance
                .get("accountIndex")
                .and_then(Value::as_u64)
                .and_then(|i| keys.get(i as usize))
            else {
                continue;
            };
            let Some(mint) = str_field(balance, "mint") else {
                continue;
            };
            let decimals = balance
                .get("uiTokenAmount")
                .and_then(|u| u.get("decimals"))
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_DECIMALS as u64) as u8;

            accounts.insert(
                key.clone(),
                TokenAccount {
                    owner: str_field(balance, "owner").map(String::from),
                    mint: mint.to_string(),
                    decimals,
                },
            );
        }
    }
    accounts
}

/// Decode one `getTransaction` response (jsonParsed encoding).
///
/// Returns `None` when the payload has no signature. Instructions the decoder
/// does not understand still contribute their program id.
pub fn decode_transaction(raw: &Value, wallet: &str, catalog: &ProgramCatalog) -> Option<WalletTransaction> {
    let transaction = raw.get("transaction")?;
    let signature = transaction
        .get("signatures")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(Value::as_str)?
        .to_string();

    let message = transaction.get("message").unwrap_or(&Value::Null);
    let meta = raw.get("meta").unwrap_or(&Value::Null);
    let keys = account_keys(message);

    let ctx = Context {
        wallet,
        catalog,
        token_accounts: token_accounts(meta, &keys),
    };

    let mut tx = WalletTransaction {
        signature,
        block_time: raw.get("blockTime").and_then(Value::as_i64).unwrap_or(0),
        account: keys.first().cloned(),
        failed: meta.get("err").map_or(false, |e| !e.is_null()),
        sol_balance_after: keys.iter().position(|k| k == wallet).and_then(|i| {
            meta.get("postBalances")
                .and_then(Value::as_array)
                .and_then(|b| b.get(i))
                .and_then(Value::as_u64)
                .map(|lamports| lamports as f64 / LAMPORTS_PER_SOL)
        }),
        ..Default::default()
    };

    if tx.failed {
        let held: BTreeSet<&str> = ctx
            .token_accounts
            .values()
            .filter(|t| t.owner.as_deref() == Some(wallet))
            .map(|t| t.mint.as_str())
            .collect();
        tx.failed_mints = held.into_iter().map(String::from).collect();
    }

    let outer = message
        .get("instructions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for ix in &outer {
        if let Some(program_id) = str_field(ix, "programId") {
            tx.program_ids.push(program_id.to_string());
        }
    }

    let inner: Vec<Value> = meta
        .get("innerInstructions")
        .and_then(Value::as_array)
        .map(|sets| {
            sets.iter()
                .filter_map(|set| set.get("instructions").and_then(Value::as_array))
                .flatten()
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut memos = Vec::new();
    for ix in outer.iter().chain(inner.iter()) {
        if str_field(ix, "program") == Some("spl-memo") {
            if let Some(text) = ix.get("parsed").and_then(Value::as_str) {
                memos.push(text.to_string());
            }
            continue;
        }
        if let Some(event) = decode_instruction(ix, &ctx) {
            tx.events.push(event);
        }
    }

    if !memos.is_empty() {
        tx.memo = Some(memos.join(" "));
    }

    Some(tx)
}

fn decode_instruction(ix: &Value, ctx: &Context<'_>) -> Option<TransactionEvent> {
    let program = str_field(ix, "program")?;
    let parsed = ix.get("parsed")?;
    let ix_type = str_field(parsed, "type")?;
    let info = parsed.get("info")?;

    match (program, ix_type) {
        ("system", "transfer") | ("system", "transferWithSeed") => {
            let lamports = info.get("lamports").and_then(Value::as_u64).unwrap_or(0);
            let source = str_field(info, "source")?;
            let destination = str_field(info, "destination")?;
            let amount = lamports as f64 / LAMPORTS_PER_SOL;

            if destination == ctx.wallet {
                Some(TransactionEvent::sol_transfer(Direction::Incoming, amount, source))
            } else if source == ctx.wallet {
                Some(TransactionEvent::sol_transfer(Direction::Outgoing, amount, destination))
            } else {
                None
            }
        }
        ("spl-token" | "spl-token-2022", "transfer" | "transferChecked") => {
            let source = str_field(info, "source")?;
            let destination = str_field(info, "destination")?;
            let mint = ctx.mint_of(info, &[source, destination])?;
            let amount = token_amount(info, ctx.decimals_of(&mint, &[source, destination]));

            let from = str_field(info, "authority")
                .or_else(|| str_field(info, "multisigAuthority"))
                .map(String::from)
                .unwrap_or_else(|| ctx.owner_of(source));
            let to = ctx.owner_of(destination);

            if to == ctx.wallet {
                Some(TransactionEvent::token_transfer(Direction::Incoming, amount, &from, &mint))
            } else if from == ctx.wallet || ctx.owner_of(source) == ctx.wallet {
                Some(TransactionEvent::token_transfer(Direction::Outgoing, amount, &to, &mint))
            } else {
                None
            }
        }
        ("spl-token" | "spl-token-2022", "approve" | "approveChecked") => {
            let owner = str_field(info, "owner")
                .map(String::from)
                .or_else(|| str_field(info, "source").map(|s| ctx.owner_of(s)))?;
            if owner != ctx.wallet {
                return None;
            }
            let delegate = str_field(info, "delegate")?;
            let source = str_field(info, "source").unwrap_or_default();
            let mint = ctx.mint_of(info, &[source]);
            let mut event = TransactionEvent::token_approval(delegate, mint.as_deref());
            if let Some(mint) = &mint {
                event.amount = token_amount(info, ctx.decimals_of(mint, &[source]));
            }
            Some(event)
        }
        ("spl-token" | "spl-token-2022", "mintTo" | "mintToChecked") => {
            let account = str_field(info, "account")?;
            let mint = ctx.mint_of(info, &[account])?;
            let authority = str_field(info, "mintAuthority")
                .or_else(|| str_field(info, "multisigMintAuthority"))?;
            let recipient = ctx.owner_of(account);
            let touches_wallet = recipient == ctx.wallet || authority == ctx.wallet;
            if !touches_wallet {
                return None;
            }
            Some(TransactionEvent {
                kind: EventKind::MintTo,
                direction: if recipient == ctx.wallet {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                },
                amount: token_amount(info, ctx.decimals_of(&mint, &[account])),
                counterpart: Some(authority.to_string()),
                mint: Some(mint),
            })
        }
        _ => None,
    }
}
