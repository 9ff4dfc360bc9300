//! Optional write-through persistence
//!
//! Two append-only tables: every dispatched-or-scored signal and a
//! funding snapshot per evaluation. Strictly best-effort; a dead
//! database never slows the pipeline down.

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::{info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::signal::{Signal, SignalContext};

/// Append-only persistence seam
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn record_signal(&self, signal: &Signal) -> Result<()>;
    async fn record_funding_snapshot(&self, ctx: &SignalContext) -> Result<()>;
}

pub struct PostgresStore {
    client: tokio_postgres::Client,
}

impl PostgresStore {
    /// Connect and make sure the tables exist
    pub async fn connect(cfg: &PersistenceConfig) -> Result<Self> {
        let host = cfg
            .host
            .as_deref()
            .ok_or_else(|| crate::Error::Config("POSTGRES_HOST is not set".into()))?;

        let (client, connection) = tokio_postgres::Config::new()
            .host(host)
            .port(cfg.port)
            .dbname(&cfg.dbname)
            .user(&cfg.user)
            .password(&cfg.password)
            .connect(NoTls)
            .await?;

        // The connection object drives the socket until it closes
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("postgres connection closed: {}", e);
            }
        });

        let store = Self { client };
        store.ensure_schema().await?;
        info!("persistence connected");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS signals (
                    id          BIGSERIAL PRIMARY KEY,
                    symbol      TEXT NOT NULL,
                    type        TEXT NOT NULL,
                    bias        TEXT NOT NULL,
                    funding     DOUBLE PRECISION NOT NULL,
                    delta       DOUBLE PRECISION NOT NULL,
                    rsi         DOUBLE PRECISION,
                    score       DOUBLE PRECISION NOT NULL,
                    price       DOUBLE PRECISION NOT NULL,
                    timeframe   TEXT NOT NULL,
                    context     TEXT NOT NULL,
                    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS funding_snapshots (
                    id          BIGSERIAL PRIMARY KEY,
                    symbol      TEXT NOT NULL,
                    funding     DOUBLE PRECISION NOT NULL,
                    price       DOUBLE PRECISION NOT NULL,
                    volume_24h  DOUBLE PRECISION NOT NULL,
                    rsi         DOUBLE PRECISION,
                    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                "#,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for PostgresStore {
    async fn record_signal(&self, signal: &Signal) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO signals \
                 (symbol, type, bias, funding, delta, rsi, score, price, timeframe, context) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &signal.symbol,
                    &signal.signal_type.to_string(),
                    &signal.bias.to_string(),
                    &signal.funding_rate,
                    &signal.funding_delta,
                    &signal.rsi,
                    &signal.score,
                    &signal.price,
                    &signal.timeframe,
                    &signal.context,
                ],
            )
            .await?;
        Ok(())
    }

    async fn record_funding_snapshot(&self, ctx: &SignalContext) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO funding_snapshots (symbol, funding, price, volume_24h, rsi) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &ctx.symbol,
                    &ctx.funding_rate,
                    &ctx.price,
                    &ctx.volume_24h,
                    &ctx.rsi,
                ],
            )
            .await?;
        Ok(())
    }
}
