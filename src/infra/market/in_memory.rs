// In-memory implementation of MarketStore.
//
// All tables sit behind one RwLock. Reads share it, and every write
// operation holds the write guard from its first read to its last write, so
// each call is applied as a single serializable step.

use super::seed::SeedStore;
use crate::core::market::{
    Item, ItemRef, MarketStore, Player, PlayerRef, PurchaseEntry, PurchaseOutcome, PurchaseRecord,
    PurchaseRef, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MarketTables {
    players: BTreeMap<PlayerRef, Player>,
    items: BTreeMap<ItemRef, Item>,
    /// Append-only, in insertion order.
    purchases: Vec<PurchaseRecord>,
    next_id: i64,
}

impl MarketTables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn player(&self, id: PlayerRef) -> Result<&Player, StoreError> {
        self.players
            .get(&id)
            .ok_or_else(|| StoreError::player_not_found(id))
    }

    fn item(&self, id: ItemRef) -> Result<&Item, StoreError> {
        self.items.get(&id).ok_or_else(|| StoreError::item_not_found(id))
    }
}

pub struct InMemoryMarketStore {
    tables: RwLock<MarketTables>,
}

impl InMemoryMarketStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(MarketTables::default()),
        }
    }
}

impl Default for InMemoryMarketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn sell_item_to_player(
        &self,
        item: ItemRef,
        buyer: PlayerRef,
    ) -> Result<PurchaseOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        let item = tables.item(item)?.clone();
        let buyer = tables.player(buyer)?.clone();
        let seller = tables.player(item.owner)?.id;

        if !item.for_sale {
            return Ok(PurchaseOutcome::NotForSale);
        }

        if buyer.id == seller {
            if let Some(stored) = tables.items.get_mut(&item.id) {
                stored.for_sale = false;
            }
            return Ok(PurchaseOutcome::RemovedFromSale);
        }

        if buyer.credits < item.price {
            return Ok(PurchaseOutcome::InsufficientFunds);
        }

        // Every lookup below was validated above while holding the same guard.
        let id = PurchaseRef(tables.allocate_id());
        tables.purchases.push(PurchaseRecord {
            id,
            item: item.id,
            buyer: buyer.id,
            seller,
            price: item.price,
            created_at: Utc::now(),
        });
        if let Some(b) = tables.players.get_mut(&buyer.id) {
            b.credits = buyer.credits - item.price;
        }
        if let Some(s) = tables.players.get_mut(&seller) {
            s.credits += item.price;
        }
        if let Some(stored) = tables.items.get_mut(&item.id) {
            stored.owner = buyer.id;
            stored.for_sale = false;
        }

        Ok(PurchaseOutcome::Success)
    }

    async fn update_listing(
        &self,
        item: ItemRef,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .items
            .get_mut(&item)
            .ok_or_else(|| StoreError::item_not_found(item))?;
        stored.price = price;
        stored.for_sale = for_sale;
        Ok(stored.clone())
    }

    async fn items_for_sale(&self) -> Result<Vec<Item>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .values()
            .filter(|item| item.for_sale)
            .cloned()
            .collect())
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.players.values().cloned().collect())
    }

    async fn items_by_owner(&self, owners: &[PlayerRef]) -> Result<Vec<Vec<Item>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(owners
            .iter()
            .map(|owner| {
                tables
                    .items
                    .values()
                    .filter(|item| item.owner == *owner)
                    .cloned()
                    .collect()
            })
            .collect())
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseEntry>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .purchases
            .iter()
            .map(|record| -> Result<PurchaseEntry, StoreError> {
                Ok(PurchaseEntry {
                    key: record.id,
                    buyer: tables.player(record.buyer)?.name.clone(),
                    seller: tables.player(record.seller)?.name.clone(),
                    price: record.price,
                    label: tables.item(record.item)?.label.clone(),
                    created_at: record.created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SeedStore for InMemoryMarketStore {
    async fn is_empty(&self) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.players.is_empty() && tables.items.is_empty())
    }

    async fn create_player(&self, name: &str, credits: i64) -> Result<Player, StoreError> {
        let mut tables = self.tables.write().await;
        let player = Player {
            id: PlayerRef(tables.allocate_id()),
            name: name.to_string(),
            credits,
        };
        tables.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn create_item(
        &self,
        owner: PlayerRef,
        label: &str,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        tables.player(owner)?;
        let item = Item {
            id: ItemRef(tables.allocate_id()),
            owner,
            label: label.to_string(),
            price,
            for_sale,
        };
        tables.items.insert(item.id, item.clone());
        Ok(item)
    }
}
