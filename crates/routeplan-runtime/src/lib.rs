//! # routeplan-runtime
//!
//! Shared, long-lived route state on top of `routeplan-core`.
//!
//! The core crate is a set of pure functions. This crate holds the results:
//! the active configuration and its pipeline table, swapped atomically on
//! reload, plus a cache of pipelines assembled by an external engine.
//!
//! ## Example
//!
//! ```rust,ignore
//! use routeplan_runtime::{RouteManager, RuntimeConfig};
//!
//! let manager = RouteManager::new(my_engine, RuntimeConfig::default());
//! manager.load_file("routes.yaml")?;
//! let _sweeper = manager.start_sweeper();
//!
//! let pipeline = manager.assemble("default").await?;
//! ```

pub mod assembler;
pub mod cache;
pub mod config;
pub mod manager;

pub use assembler::{AssemblyError, PipelineAssembler};
pub use cache::{
    spawn_sweeper, AssemblyCache, AssemblyKey, CacheStats, Clock, ManualClock, SweeperHandle,
    TokioClock,
};
pub use config::{CacheConfig, ConfigError, FanOutStrategyConfig, RuntimeConfig};
pub use manager::{ActiveRoutes, RouteManager};

use routeplan_core::{ConversionError, LoadError, ParseError, ValidationReport};
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No configuration loaded")]
    NoConfigurationLoaded,

    #[error("Configuration rejected: {}", .0.errors.join("; "))]
    Rejected(ValidationReport),

    #[error("Unknown virtual model '{0}'")]
    UnknownVirtualModel(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
