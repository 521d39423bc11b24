use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Build a lazily-connecting pool. Nothing touches the network until the
    /// first query, so connectivity is reported by the run's ping rather than here.
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = env_flag("USE_PREPARED", false);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_lazy_with(connect_options);
        info!(max_connections, "target pool configured");
        Ok(Self { pool })
    }
}
