mod build;
mod cache;
mod query;

pub use build::{BuildArgs, cmd_build};
pub use cache::{CacheCommand, cmd_cache};
pub use query::cmd_query;
