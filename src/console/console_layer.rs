// Console layer - line commands in, rendered snapshots out.

#[path = "command_parser.rs"]
pub mod commands;

#[path = "session.rs"]
pub mod session;

#[path = "snapshot_view.rs"]
pub mod view;
