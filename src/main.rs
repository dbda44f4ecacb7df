// Entry point of the marketplace console.
//
// **Architecture Overview:**
// - `core/` = Market logic (store port, facade, price parsing)
// - `infra/` = Store implementations (in-memory, SQLite) and seeding
// - `console/` = Line-based front end
//
// This file's job is to:
// 1. Load configuration
// 2. Build the store and seed it
// 3. Wire the market service and its subscribers
// 4. Run the input loop

#[path = "console/console_layer.rs"]
mod console;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::{AppConfig, StoreBackend};
use crate::console::commands::{parse_command, HELP};
use crate::console::session::{execute, Reply};
use crate::console::view::render_snapshot;
use crate::core::market::{MarketService, MarketStore};
use crate::infra::market::{
    seed_if_empty, InMemoryMarketStore, SeedData, SeedStore, SqliteMarketStore,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    let seed = match &config.seed_file {
        Some(path) => SeedData::from_file(path)?,
        None => SeedData::demo(),
    };

    match config.backend {
        StoreBackend::Sqlite => {
            let store = SqliteMarketStore::new(&config.database_path)
                .await?
                .with_write_retries(config.write_retries);
            tracing::info!(path = %config.database_path, "Using SQLite market store");
            run(store, &seed, config).await
        }
        StoreBackend::Memory => {
            tracing::info!("Using in-memory market store");
            run(InMemoryMarketStore::new(), &seed, config).await
        }
    }
}

async fn run<S>(store: S, seed: &SeedData, config: AppConfig) -> anyhow::Result<()>
where
    S: MarketStore + SeedStore + 'static,
{
    seed_if_empty(&store, seed).await?;

    let service = Arc::new(MarketService::new_with_config(store, config.market));

    // Subscribers must not block, so they only signal; rendering happens here.
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<()>();
    service.subscribe(move || {
        let _ = changed_tx.send(());
    });

    let renderer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            while changed_rx.recv().await.is_some() {
                println!("{}", render_snapshot(&service.snapshot().await));
            }
        })
    };

    service.refresh(Some("Welcome to the market".to_string())).await?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match execute(&service, command).await {
            Ok(Reply::Say(text)) => println!("{}", text),
            Ok(Reply::Quiet) => {}
            Ok(Reply::Quit) => break,
            Err(e) => {
                tracing::error!("Command failed: {}", e);
                println!("error: {}", e);
            }
        }
    }

    renderer.abort();
    Ok(())
}
