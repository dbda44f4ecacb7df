// Marketplace core - the cached view of the market and the operations that
// change it.
//
// The service owns a snapshot of the authoritative store and a list of
// subscribers. Every state-affecting operation ends by swapping in a fresh
// snapshot and calling the subscribers, so a front end only ever has to
// re-read `snapshot()` when it is told to.

use super::market_models::{Item, ItemRef, Player, PlayerRef, PurchaseEntry, PurchaseOutcome};
use super::market_store::{MarketStore, StoreError};
use super::price::parse_price;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// The market as of the last completed refresh.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Items currently listed for sale.
    pub items: Vec<Item>,
    pub players: Vec<Player>,
    /// Owned items, parallel to `players`.
    pub owned_items: Vec<Vec<Item>>,
    /// Purchase history, newest first.
    pub purchases: Vec<PurchaseEntry>,
    /// Status line from the last operation. Empty when there is nothing to say.
    pub message: String,
}

impl MarketSnapshot {
    /// Items owned by `player`, or an empty slice for an unknown player.
    pub fn owned_by(&self, player: PlayerRef) -> &[Item] {
        self.players
            .iter()
            .position(|p| p.id == player)
            .and_then(|idx| self.owned_items.get(idx))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn player(&self, player: PlayerRef) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player)
    }

    /// Look an item up among listed and owned items.
    pub fn find_item(&self, item: ItemRef) -> Option<&Item> {
        self.items
            .iter()
            .chain(self.owned_items.iter().flatten())
            .find(|i| i.id == item)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the market service.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Put an optimistically removed listing back into the cache when the
    /// purchase call fails. When off, the cache stays as it was left until
    /// the next refresh.
    pub rollback_failed_sales: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rollback_failed_sales: true,
        }
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

type Subscriber = Arc<dyn Fn() + Send + Sync>;

/// The store facade used by front ends.
///
/// Generic over S: MarketStore so tests can run against the in-memory store.
pub struct MarketService<S: MarketStore> {
    store: S,
    config: MarketConfig,
    snapshot: RwLock<MarketSnapshot>,
    subscribers: StdRwLock<Vec<Subscriber>>,
    /// Last generation handed to a refresh.
    issued: AtomicU64,
    /// Generation of the snapshot currently swapped in. Only changed while
    /// the snapshot write lock is held.
    applied: AtomicU64,
}

impl<S: MarketStore> MarketService<S> {
    /// Create a new market service on top of the given store.
    pub fn new(store: S) -> Self {
        Self::new_with_config(store, MarketConfig::default())
    }

    pub fn new_with_config(store: S, config: MarketConfig) -> Self {
        Self {
            store,
            config,
            snapshot: RwLock::new(MarketSnapshot::default()),
            subscribers: StdRwLock::new(Vec::new()),
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// A copy of the current snapshot.
    pub async fn snapshot(&self) -> MarketSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Register a callback that runs after every snapshot change.
    ///
    /// Callbacks run in registration order and must not block.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    fn inform(&self) {
        // Clone the list so a callback may subscribe without deadlocking.
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in subscribers {
            callback();
        }
    }

    /// Reload everything from the store and notify subscribers.
    ///
    /// The three loads run concurrently. Nothing is swapped in and nobody is
    /// notified unless all of them succeed. A refresh that finishes after a
    /// later-started one has already been applied is dropped.
    pub async fn refresh(&self, message: Option<String>) -> Result<(), MarketError> {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        let players_and_items = async {
            let players = self.store.list_players().await?;
            let refs: Vec<PlayerRef> = players.iter().map(|p| p.id).collect();
            let owned = self.store.items_by_owner(&refs).await?;
            Ok::<_, StoreError>((players, owned))
        };
        let purchases = async {
            let mut purchases = self.store.list_purchases().await?;
            purchases.reverse();
            Ok::<_, StoreError>(purchases)
        };

        let (items, (players, owned_items), purchases) =
            tokio::try_join!(self.store.items_for_sale(), players_and_items, purchases)?;

        tracing::debug!(
            items = items.len(),
            players = players.len(),
            purchases = purchases.len(),
            "Market snapshot refreshed"
        );

        {
            let mut snapshot = self.snapshot.write().await;
            if generation < self.applied.load(Ordering::SeqCst) {
                tracing::debug!(generation, "Refresh overtaken by a newer one, dropping it");
                return Ok(());
            }
            self.applied.store(generation, Ordering::SeqCst);
            *snapshot = MarketSnapshot {
                items,
                players,
                owned_items,
                purchases,
                message: message.unwrap_or_default(),
            };
        }

        self.inform();
        Ok(())
    }

    /// Buy `item` on behalf of `player`.
    ///
    /// The listing disappears from the cache before the store is contacted so
    /// front ends can react immediately. Declined purchases are returned as
    /// outcomes, not errors.
    pub async fn sell(&self, item: &Item, player: &Player) -> Result<PurchaseOutcome, MarketError> {
        let removed = self.remove_listing(item).await;
        self.inform();

        let outcome = match self.store.sell_item_to_player(item.id, player.id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    item = item.id.0,
                    buyer = player.id.0,
                    error = %e,
                    "Purchase call failed"
                );
                if self.config.rollback_failed_sales {
                    if let Some((idx, listing)) = removed {
                        self.restore_listing(idx, listing).await;
                        self.inform();
                    }
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            item = item.id.0,
            buyer = player.id.0,
            outcome = %outcome,
            success = outcome.is_success(),
            "Purchase evaluated"
        );

        // The purchase already happened; a failed reload only leaves the cache stale.
        if let Err(e) = self.refresh(Some(outcome.to_string())).await {
            tracing::warn!("Refresh after purchase failed: {}", e);
        }

        Ok(outcome)
    }

    /// List or unlist `item` at the price typed in `price_text`.
    ///
    /// An unparseable price is reported through the snapshot message and the
    /// returned error; the store is not touched in that case.
    pub async fn make_for_sale(
        &self,
        item: &Item,
        price_text: &str,
        is_for_sale: bool,
    ) -> Result<Item, MarketError> {
        let Some(price) = parse_price(price_text) else {
            let err = MarketError::InvalidPrice(price_text.to_string());
            if let Err(e) = self.refresh(Some(err.to_string())).await {
                tracing::warn!("Refresh after invalid price failed: {}", e);
            }
            return Err(err);
        };

        let updated = self
            .store
            .update_listing(item.id, price, is_for_sale)
            .await?;

        tracing::info!(
            item = updated.id.0,
            price = updated.price,
            for_sale = updated.for_sale,
            "Listing updated"
        );

        // Same as for purchases: the listing is stored even if the reload fails.
        if let Err(e) = self.refresh(None).await {
            tracing::warn!("Refresh after listing update failed: {}", e);
        }
        Ok(updated)
    }

    async fn remove_listing(&self, item: &Item) -> Option<(usize, Item)> {
        let mut snapshot = self.snapshot.write().await;
        let idx = snapshot.items.iter().position(|i| i.id == item.id)?;
        Some((idx, snapshot.items.remove(idx)))
    }

    async fn restore_listing(&self, idx: usize, listing: Item) {
        let mut snapshot = self.snapshot.write().await;
        if snapshot.items.iter().any(|i| i.id == listing.id) {
            return;
        }
        let idx = idx.min(snapshot.items.len());
        snapshot.items.insert(idx, listing);
    }
}

// ============================================================================
// TESTS
// ============================================================================
