// Marketplace domain models - players, items and the purchase ledger.
//
// These are plain data types with no storage or console dependencies.
// Store implementations build them, the service caches them, the console
// layer renders them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTITIES
// ============================================================================

/// Reference to a player record in the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerRef(pub i64);

/// Reference to an item record in the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRef(pub i64);

/// Reference to a purchase record. Doubles as the display key for history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseRef(pub i64);

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

impl fmt::Display for PurchaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "purchase#{}", self.0)
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A participant in the market with a credit balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerRef,
    pub name: String,
    /// Never negative: purchases are refused when the balance is short.
    pub credits: i64,
}

/// Something a player owns and may offer for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemRef,
    pub owner: PlayerRef,
    pub label: String,
    pub price: i64,
    pub for_sale: bool,
}

/// Ledger entry written once per completed sale. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: PurchaseRef,
    pub item: ItemRef,
    pub buyer: PlayerRef,
    pub seller: PlayerRef,
    /// Item price at the moment the sale was evaluated.
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

/// A purchase record joined with names and label for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEntry {
    pub key: PurchaseRef,
    pub buyer: String,
    pub seller: String,
    pub price: i64,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of evaluating a purchase against the store.
///
/// Every variant is a completed call: only store or transport failures are
/// reported as errors. `Display` produces the status line shown to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOutcome {
    /// The item was not listed when the transaction ran.
    NotForSale,
    /// The buyer already owned the item, so the listing was withdrawn.
    RemovedFromSale,
    /// The buyer's balance was below the item price.
    InsufficientFunds,
    /// Ownership and credits moved, and a purchase record was written.
    Success,
}

impl PurchaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOutcome::NotForSale => "purchase failed: item not for sale",
            PurchaseOutcome::RemovedFromSale => "item removed from sale",
            PurchaseOutcome::InsufficientFunds => "purchase failed: insufficient funds",
            PurchaseOutcome::Success => "purchase success",
        }
    }

    /// True only when the item changed hands.
    pub fn is_success(&self) -> bool {
        matches!(self, PurchaseOutcome::Success)
    }
}

impl fmt::Display for PurchaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
