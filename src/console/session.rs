// Executes parsed console commands against the market service.

use super::commands::{ConsoleCommand, HELP};
use super::view::render_snapshot;
use crate::core::market::{MarketError, MarketService, MarketStore};

/// What the input loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Print this text and keep reading.
    Say(String),
    /// Nothing to print; subscribers take care of output.
    Quiet,
    Quit,
}

pub async fn execute<S: MarketStore>(
    service: &MarketService<S>,
    command: ConsoleCommand,
) -> Result<Reply, MarketError> {
    match command {
        ConsoleCommand::Show => Ok(Reply::Say(render_snapshot(&service.snapshot().await))),
        ConsoleCommand::Help => Ok(Reply::Say(HELP.to_string())),
        ConsoleCommand::Quit => Ok(Reply::Quit),
        ConsoleCommand::Refresh => {
            service.refresh(None).await?;
            Ok(Reply::Quiet)
        }
        ConsoleCommand::Buy { item, player } => {
            let snapshot = service.snapshot().await;
            let Some(item) = snapshot.find_item(item) else {
                return Ok(Reply::Say(format!("no such item: {}", item.0)));
            };
            let Some(player) = snapshot.player(player) else {
                return Ok(Reply::Say(format!("no such player: {}", player.0)));
            };
            service.sell(item, player).await?;
            Ok(Reply::Quiet)
        }
        ConsoleCommand::List {
            item,
            price,
            for_sale,
        } => {
            let snapshot = service.snapshot().await;
            let Some(item) = snapshot.find_item(item) else {
                return Ok(Reply::Say(format!("no such item: {}", item.0)));
            };
            match service.make_for_sale(item, &price, for_sale).await {
                Ok(_) => Ok(Reply::Quiet),
                // Already reported through the snapshot message.
                Err(MarketError::InvalidPrice(_)) => Ok(Reply::Quiet),
                Err(e) => Err(e),
            }
        }
    }
}
