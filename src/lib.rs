pub mod cli;
pub mod github;
pub mod load_config;
pub mod pr_ref;
pub mod version;

pub use cli::{run, Cli, Commands};
