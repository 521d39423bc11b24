pub mod config;
pub mod controller;
pub mod database_ops;
pub mod identity;
pub mod loader;
pub mod logging;
pub mod model;
pub mod normalization;
pub mod repair;
pub mod source;
pub mod stats;

pub mod util {
    pub mod env;
}

pub use config::MigrationConfig;
pub use controller::{run_migration, RunAborted, RunController, RunPhase, RunReport};
