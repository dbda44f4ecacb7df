// Storage port for the marketplace.
//
// The core defines what it needs from the authoritative store; the infra
// layer provides the in-memory and SQLite implementations.

use super::market_models::{Item, ItemRef, Player, PlayerRef, PurchaseEntry, PurchaseOutcome};
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Failures of the store itself. Business-rule refusals are never reported
/// here, they come back as a `PurchaseOutcome`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// A conflicting transaction kept the store busy past the retry limit.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn player_not_found(id: PlayerRef) -> Self {
        StoreError::NotFound {
            kind: "player",
            id: id.0,
        }
    }

    pub fn item_not_found(id: ItemRef) -> Self {
        StoreError::NotFound {
            kind: "item",
            id: id.0,
        }
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Transactional access to marketplace state.
///
/// Every method is evaluated as one atomic unit. Implementations must
/// serialize `sell_item_to_player` calls that touch the same item so that at
/// most one of them can succeed.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Evaluate a purchase of `item` by `buyer`.
    ///
    /// Checks run in order: listing flag, self-purchase, balance. On success
    /// the purchase record, both balance changes and the ownership transfer
    /// are applied together.
    async fn sell_item_to_player(
        &self,
        item: ItemRef,
        buyer: PlayerRef,
    ) -> Result<PurchaseOutcome, StoreError>;

    /// Overwrite an item's price and for-sale flag, returning the new record.
    async fn update_listing(
        &self,
        item: ItemRef,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError>;

    /// All items currently listed.
    async fn items_for_sale(&self) -> Result<Vec<Item>, StoreError>;

    /// All players.
    async fn list_players(&self) -> Result<Vec<Player>, StoreError>;

    /// Items owned by each player, parallel to `owners`.
    async fn items_by_owner(&self, owners: &[PlayerRef]) -> Result<Vec<Vec<Item>>, StoreError>;

    /// Purchase history in insertion order (oldest first).
    async fn list_purchases(&self) -> Result<Vec<PurchaseEntry>, StoreError>;
}
