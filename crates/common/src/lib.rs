//! Common utilities and shared types for fanout-rs.
//!
//! This crate provides foundational components used across all fanout-rs crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based job ids and lock tokens via [`IdGenerator`]
//! - **Metrics**: Pipeline counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use fanout_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let job_id = id_gen.generate();
//!     println!("{} -> {}", config.redis.url, job_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod metrics;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use metrics::{Metrics, MetricsSnapshot};
