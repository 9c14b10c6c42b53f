pub mod cli;
pub mod llm;
pub mod load_config;
pub mod preview_server;
pub mod render_client;

pub use cli::{run, Cli, Commands};
