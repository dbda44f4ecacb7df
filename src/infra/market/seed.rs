// Seed data for a fresh market.
//
// Players and items are not created by the market itself; a new store is
// populated once from a JSON file or from the built-in demo set.

use crate::core::market::{Item, Player, PlayerRef, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Creation hooks that only seeding needs.
#[async_trait]
pub trait SeedStore: Send + Sync {
    /// True when the store holds no players and no items.
    async fn is_empty(&self) -> Result<bool, StoreError>;

    async fn create_player(&self, name: &str, credits: i64) -> Result<Player, StoreError>;

    async fn create_item(
        &self,
        owner: PlayerRef,
        label: &str,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPlayer {
    pub name: String,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedItem {
    /// Index into `SeedData::players`.
    pub owner: usize,
    pub label: String,
    pub price: i64,
    #[serde(default)]
    pub for_sale: bool,
}

/// Initial market contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedData {
    pub players: Vec<SeedPlayer>,
    pub items: Vec<SeedItem>,
}

impl SeedData {
    /// Read seed data from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref())?;
        let data: SeedData = serde_json::from_reader(BufReader::new(file))?;
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for player in &self.players {
            if player.credits < 0 {
                anyhow::bail!("player {} has negative credits", player.name);
            }
        }
        for item in &self.items {
            if item.owner >= self.players.len() {
                anyhow::bail!("item {} has unknown owner {}", item.label, item.owner);
            }
            if item.price < 0 {
                anyhow::bail!("item {} has a negative price", item.label);
            }
        }
        Ok(())
    }

    /// A small market with three players, some items listed and some not.
    pub fn demo() -> Self {
        let player = |name: &str, credits| SeedPlayer {
            name: name.to_string(),
            credits,
        };
        let item = |owner, label: &str, price, for_sale| SeedItem {
            owner,
            label: label.to_string(),
            price,
            for_sale,
        };

        Self {
            players: vec![
                player("Ada", 100),
                player("Grace", 100),
                player("Linus", 100),
            ],
            items: vec![
                item(0, "Brass Lantern", 25, true),
                item(0, "Silver Compass", 60, false),
                item(1, "Old Map", 40, true),
                item(1, "Rope (50ft)", 10, true),
                item(2, "Iron Key", 75, false),
                item(2, "Cracked Shield", 120, true),
            ],
        }
    }
}

/// Populate `store` from `data` unless it already has content.
///
/// Returns true when seeding happened.
pub async fn seed_if_empty<S: SeedStore>(store: &S, data: &SeedData) -> Result<bool, StoreError> {
    if !store.is_empty().await? {
        tracing::debug!("Store already has data, skipping seed");
        return Ok(false);
    }

    let mut players = Vec::with_capacity(data.players.len());
    for seed in &data.players {
        players.push(store.create_player(&seed.name, seed.credits).await?);
    }

    for seed in &data.items {
        let owner = players.get(seed.owner).ok_or_else(|| {
            StoreError::Storage(format!("seed item {} has unknown owner", seed.label))
        })?;
        store
            .create_item(owner.id, &seed.label, seed.price, seed.for_sale)
            .await?;
    }

    tracing::info!(
        players = data.players.len(),
        items = data.items.len(),
        "Seeded market"
    );
    Ok(true)
}
