// Plain-text rendering of a market snapshot.

use crate::core::market::MarketSnapshot;
use std::fmt::Write;

pub fn render_snapshot(snapshot: &MarketSnapshot) -> String {
    let mut out = String::new();

    if !snapshot.message.is_empty() {
        let _ = writeln!(out, ">> {}", snapshot.message);
    }

    let _ = writeln!(out, "== For sale ==");
    if snapshot.items.is_empty() {
        let _ = writeln!(out, "  (nothing listed)");
    }
    for item in &snapshot.items {
        let owner = snapshot
            .player(item.owner)
            .map(|p| p.name.as_str())
            .unwrap_or("?");
        let _ = writeln!(
            out,
            "  [{}] {} - {} credits (from {})",
            item.id.0, item.label, item.price, owner
        );
    }

    let _ = writeln!(out, "== Players ==");
    for player in &snapshot.players {
        let _ = writeln!(
            out,
            "  [{}] {} - {} credits",
            player.id.0, player.name, player.credits
        );
        for item in snapshot.owned_by(player.id) {
            let listing = if item.for_sale { " (listed)" } else { "" };
            let _ = writeln!(
                out,
                "      [{}] {} @ {}{}",
                item.id.0, item.label, item.price, listing
            );
        }
    }

    let _ = writeln!(out, "== Purchases ==");
    if snapshot.purchases.is_empty() {
        let _ = writeln!(out, "  (none yet)");
    }
    for purchase in &snapshot.purchases {
        let _ = writeln!(
            out,
            "  #{} {} bought {} from {} for {} ({})",
            purchase.key.0,
            purchase.buyer,
            purchase.label,
            purchase.seller,
            purchase.price,
            purchase.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{Item, ItemRef, Player, PlayerRef, PurchaseEntry, PurchaseRef};
    use chrono::Utc;

    #[test]
    fn test_render_lists_everything() {
        let ada = Player {
            id: PlayerRef(1),
            name: "Ada".to_string(),
            credits: 70,
        };
        let lamp = Item {
            id: ItemRef(2),
            owner: ada.id,
            label: "Lamp".to_string(),
            price: 30,
            for_sale: true,
        };
        let snapshot = MarketSnapshot {
            items: vec![lamp.clone()],
            players: vec![ada],
            owned_items: vec![vec![lamp]],
            purchases: vec![PurchaseEntry {
                key: PurchaseRef(9),
                buyer: "Ada".to_string(),
                seller: "Grace".to_string(),
                price: 30,
                label: "Map".to_string(),
                created_at: Utc::now(),
            }],
            message: "purchase success".to_string(),
        };

        let text = render_snapshot(&snapshot);

        assert!(text.starts_with(">> purchase success\n"));
        assert!(text.contains("[2] Lamp - 30 credits (from Ada)"));
        assert!(text.contains("[1] Ada - 70 credits"));
        assert!(text.contains("[2] Lamp @ 30 (listed)"));
        assert!(text.contains("#9 Ada bought Map from Grace for 30 ("));
    }

    #[test]
    fn test_render_empty_market() {
        let text = render_snapshot(&MarketSnapshot::default());
        assert!(!text.contains(">>"));
        assert!(text.contains("(nothing listed)"));
        assert!(text.contains("(none yet)"));
    }
}
