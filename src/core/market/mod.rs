// Market module - domain logic for the player-to-player marketplace

mod market_models;
mod market_service;
mod market_store;
pub mod price;

pub use market_models::{
    Item, ItemRef, Player, PlayerRef, PurchaseEntry, PurchaseOutcome, PurchaseRecord, PurchaseRef,
};
pub use market_service::{MarketConfig, MarketError, MarketService, MarketSnapshot};
pub use market_store::{MarketStore, StoreError};
