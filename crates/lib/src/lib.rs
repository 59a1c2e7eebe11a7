//! hammer-lib: Core types and logic for hammer
//!
//! This crate turns declarative package specs into distributable packages:
//! - `spec`: loading `spec.yml` files and expanding `multi` variants into a forest
//! - `fetch` / `cache`: downloading and verifying resources, cached by URL
//! - `logs`: fanning a build script's output out to rollup, file and passthrough consumers
//! - `build`: driving one variant through setup, build script and packaging
//! - `schedule`: building a whole forest with a bounded worker pool

pub mod build;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod consts;
pub mod fetch;
pub mod logs;
pub mod package;
pub mod platform;
pub mod schedule;
pub mod spec;
pub mod template;
