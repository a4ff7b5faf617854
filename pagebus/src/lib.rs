pub mod cli;
pub mod load_config;
pub mod servicebus;
pub mod watcher;

pub use cli::{run, Cli, Commands};
