//! Platform-specific locations used as configuration defaults.

pub mod paths;
