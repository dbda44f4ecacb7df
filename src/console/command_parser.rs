// Parsing of console input lines.

use crate::core::market::{ItemRef, PlayerRef};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  show                          print the current snapshot
  refresh                       reload everything from the store
  buy <item> <player>           buy an item for a player
  list <item> <price> [on|off]  set an item's price and listing (default on)
  help                          show this text
  quit                          leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Show,
    Refresh,
    Buy {
        item: ItemRef,
        player: PlayerRef,
    },
    /// The price stays as typed; the market service validates it.
    List {
        item: ItemRef,
        price: String,
        for_sale: bool,
    },
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not an id: {0}")]
    BadId(String),
}

fn parse_id(text: &str) -> Result<i64, ParseError> {
    text.parse::<i64>()
        .map_err(|_| ParseError::BadId(text.to_string()))
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("show", []) => ConsoleCommand::Show,
        ("refresh", []) => ConsoleCommand::Refresh,
        ("help", _) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        ("buy", [item, player]) => ConsoleCommand::Buy {
            item: ItemRef(parse_id(item)?),
            player: PlayerRef(parse_id(player)?),
        },
        ("buy", _) => return Err(ParseError::Usage("buy <item> <player>")),
        ("list", [item, price]) => ConsoleCommand::List {
            item: ItemRef(parse_id(item)?),
            price: price.to_string(),
            for_sale: true,
        },
        ("list", [item, price, flag]) => {
            let for_sale = match *flag {
                "on" | "yes" | "true" => true,
                "off" | "no" | "false" => false,
                _ => return Err(ParseError::Usage("list <item> <price> [on|off]")),
            };
            ConsoleCommand::List {
                item: ItemRef(parse_id(item)?),
                price: price.to_string(),
                for_sale,
            }
        }
        ("list", _) => return Err(ParseError::Usage("list <item> <price> [on|off]")),
        (other, _) => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}
