//! courier - runs the publishing loops against in-memory collaborators.
//!
//! Configuration comes from the environment (`COURIER_*`, `AWS_*`, `.env`).
//! A stand-in fetch worker drains the queue and writes results back so every
//! loop has something to do.
//!
//! Usage: `courier-cli [run-for-seconds]` (runs until Ctrl-C when omitted)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::domain::{FetchResult, TokenKey, TokenRecord};
use courier_core::impls::{InMemoryTokenStore, InMemoryTransport};
use courier_core::ports::TokenStore;
use courier_core::{AppBuilder, CourierConfig};

const DEMO_CONTRACTS: [(&str, &str); 2] = [("0xBEEF", "ERC721"), ("0xCAFE", "ERC1155")];
const TOKENS_PER_CONTRACT: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courier_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let run_for = std::env::args()
        .nth(1)
        .map(|s| s.parse::<u64>().map(Duration::from_secs))
        .transpose()
        .context("run-for-seconds must be a whole number")?;

    let config = CourierConfig::from_env().context("failed to load courier configuration")?;
    let source = config.source.clone();
    tracing::info!(?config, "configuration loaded");

    let store = InMemoryTokenStore::new();
    let transport = InMemoryTransport::new(config.transport.clone());
    seed(&store, &source).await.context("failed to seed demo tokens")?;

    let app = AppBuilder::new()
        .config(config)
        .store(Arc::new(store.clone()))
        .transport(Arc::new(transport.clone()))
        .build()
        .context("failed to build courier")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let fetcher = tokio::spawn(fetch_worker(store.clone(), transport, stop_rx));
    let scheduler = app.start();

    match run_for {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => tracing::info!("run time elapsed"),
                res = tokio::signal::ctrl_c() => res.context("failed to listen for Ctrl-C")?,
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?,
    }

    tracing::info!("shutting down");
    scheduler.shutdown_and_join().await;
    let _ = stop_tx.send(true);
    let _ = fetcher.await;

    let counts = store.counts(&source).await.context("failed to read final counts")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&counts).context("failed to render counts")?
    );
    Ok(())
}

async fn seed(store: &InMemoryTokenStore, source: &str) -> Result<()> {
    for (contract, token_type) in DEMO_CONTRACTS {
        for token_id in 1..=TOKENS_PER_CONTRACT {
            let key = TokenKey::new(contract, token_id.to_string());
            store
                .insert(TokenRecord::new(key, source, token_type))
                .await?;
        }
    }
    Ok(())
}

/// Stand-in for the downstream metadata fetcher.
///
/// Every third token fails on its first attempt so the resync loop has work.
async fn fetch_worker(
    store: InMemoryTokenStore,
    transport: InMemoryTransport,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut consumed = 0;
    let mut attempts: HashMap<TokenKey, u32> = HashMap::new();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        let messages = transport.messages().await;
        for message in &messages[consumed..] {
            let body = match message.decode_body() {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(message_id = %message.id, error = %err, "undecodable message body");
                    continue;
                }
            };
            let key = TokenKey::new(body.contract_address, body.token_id);
            let attempt = attempts.entry(key.clone()).or_default();
            *attempt += 1;

            let flaky = key.token_id().parse::<usize>().is_ok_and(|n| n % 3 == 0);
            let result = if flaky && *attempt == 1 {
                FetchResult::failed("gateway timeout")
            } else {
                FetchResult::fetched(json!({
                    "name": format!("{} #{}", key.contract_address(), key.token_id()),
                    "contractType": body.contract_type,
                }))
            };
            if let Err(err) = store.upsert_fetch_result(&key, result).await {
                tracing::warn!(token = %key, error = %err, "failed to record fetch result");
            }
        }
        consumed = messages.len();
    }
}
