//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to the sync engine.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{exit_code, map_error};
pub use parse::{Cli, Commands, FolderCommands};
pub use presentation::FolderRow;
pub use route::RunContext;
