//! PostgreSQL state manager

use super::{RelayLedger, RelayStats, RelayStore};
use crate::chain::EventPool;
use crate::config::DatabaseConfig;
use crate::coordination::{Leg, LegState, OutboxRecord, PendingSnapshot, SettlementOutbox};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{CrossChainEvent, RelayKey};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
    /// Identifies this process in claims it writes.
    run_id: Uuid,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig, run_id: Uuid) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool, run_id })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relayed_transactions (
                source_chain VARCHAR(32) NOT NULL,
                source_tx_hash VARCHAR(66) NOT NULL,
                claimed_by UUID NOT NULL,
                claimed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (source_chain, source_tx_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cross_chain_events (
                event_hash VARCHAR(66) PRIMARY KEY,
                nonce BIGINT NOT NULL,
                source_chain VARCHAR(32) NOT NULL,
                source_tx_hash VARCHAR(66) NOT NULL,
                event_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_source_tx
            ON cross_chain_events (source_chain, source_tx_hash)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settlement_outbox (
                snapshot_key VARCHAR(128) PRIMARY KEY,
                amount TEXT NOT NULL,
                debit_nonce BIGINT NOT NULL,
                release_state JSONB NOT NULL,
                debit_state JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn outbox_record(row: &PgRow) -> RelayerResult<OutboxRecord> {
        let amount: String = row.get("amount");
        let amount = U256::from_dec_str(&amount)
            .map_err(|e| RelayerError::Internal(format!("Bad stored amount {}: {}", amount, e)))?;
        let release = serde_json::from_value(row.get::<serde_json::Value, _>("release_state"))
            .map_err(|e| RelayerError::Internal(e.to_string()))?;
        let debit = serde_json::from_value(row.get::<serde_json::Value, _>("debit_state"))
            .map_err(|e| RelayerError::Internal(e.to_string()))?;

        Ok(OutboxRecord {
            key: row.get("snapshot_key"),
            snapshot: PendingSnapshot {
                amount,
                debit_nonce: row.get::<i64, _>("debit_nonce") as u64,
            },
            release,
            debit,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }
}

fn leg_json(state: &LegState) -> RelayerResult<serde_json::Value> {
    serde_json::to_value(state).map_err(|e| RelayerError::Internal(e.to_string()))
}

#[async_trait]
impl EventPool for StateManager {
    async fn add_event(&self, event: CrossChainEvent) -> RelayerResult<()> {
        let event_hash = event.hash();
        let event_data =
            serde_json::to_value(&event).map_err(|e| RelayerError::Internal(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO cross_chain_events
                (event_hash, nonce, source_chain, source_tx_hash, event_data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_hash) DO NOTHING
            "#,
        )
        .bind(format!("{:?}", event_hash))
        .bind(event.nonce() as i64)
        .bind(event.source_chain().as_str())
        .bind(format!("{:?}", event.source_tx_hash()))
        .bind(event_data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::PoolRejection {
                pool: "event pool".to_string(),
                message: format!("duplicate event {:?}", event_hash),
            });
        }

        debug!(event_hash = ?event_hash, nonce = event.nonce(), "Stored cross-chain event");
        Ok(())
    }
}

#[async_trait]
impl RelayLedger for StateManager {
    async fn claim(&self, key: &RelayKey) -> RelayerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO relayed_transactions (source_chain, source_tx_hash, claimed_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_chain, source_tx_hash) DO NOTHING
            "#,
        )
        .bind(key.source_chain.as_str())
        .bind(format!("{:?}", key.source_tx_hash))
        .bind(self.run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &RelayKey) -> RelayerResult<()> {
        sqlx::query(
            "DELETE FROM relayed_transactions WHERE source_chain = $1 AND source_tx_hash = $2",
        )
        .bind(key.source_chain.as_str())
        .bind(format!("{:?}", key.source_tx_hash))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SettlementOutbox for StateManager {
    async fn open(&self, snapshot: &PendingSnapshot) -> RelayerResult<OutboxRecord> {
        let fresh = OutboxRecord::new(*snapshot);

        sqlx::query(
            r#"
            INSERT INTO settlement_outbox
                (snapshot_key, amount, debit_nonce, release_state, debit_state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (snapshot_key) DO NOTHING
            "#,
        )
        .bind(&fresh.key)
        .bind(snapshot.amount.to_string())
        .bind(snapshot.debit_nonce as i64)
        .bind(leg_json(&fresh.release)?)
        .bind(leg_json(&fresh.debit)?)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT snapshot_key, amount, debit_nonce, release_state, debit_state, created_at
            FROM settlement_outbox
            WHERE snapshot_key = $1
            "#,
        )
        .bind(&fresh.key)
        .fetch_one(&self.pool)
        .await?;

        Self::outbox_record(&row)
    }

    async fn record_leg(&self, key: &str, leg: Leg, state: &LegState) -> RelayerResult<()> {
        let expected = state.predecessor().ok_or_else(|| {
            RelayerError::Internal(format!("Cannot move {} leg of {} back to pending", leg, key))
        })?;

        // Compare-and-set on the previous state: only one writer moves a leg.
        let query = match leg {
            Leg::Release => {
                r#"
                UPDATE settlement_outbox SET release_state = $1, updated_at = NOW()
                WHERE snapshot_key = $2 AND release_state->>'state' = $3
                "#
            }
            Leg::Debit => {
                r#"
                UPDATE settlement_outbox SET debit_state = $1, updated_at = NOW()
                WHERE snapshot_key = $2 AND debit_state->>'state' = $3
                "#
            }
        };

        let result = sqlx::query(query)
            .bind(leg_json(state)?)
            .bind(key)
            .bind(expected)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::Internal(format!(
                "Illegal {} transition to {} for {}: record missing or not {}",
                leg,
                state.label(),
                key,
                expected
            )));
        }

        debug!(key, leg = %leg, state = state.label(), "Recorded settlement leg");
        Ok(())
    }
}

#[async_trait]
impl RelayStore for StateManager {
    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<RelayStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM relayed_transactions) AS relayed,
                (SELECT COUNT(*) FROM cross_chain_events) AS events,
                (SELECT COUNT(*) FROM settlement_outbox) AS settlements,
                (SELECT COUNT(*) FROM settlement_outbox WHERE release_state->>'state' = 'submitted')
                  + (SELECT COUNT(*) FROM settlement_outbox WHERE debit_state->>'state' = 'submitted')
                  AS submitted,
                (SELECT COUNT(*) FROM settlement_outbox WHERE release_state->>'state' = 'failed')
                  + (SELECT COUNT(*) FROM settlement_outbox WHERE debit_state->>'state' = 'failed')
                  AS failed,
                (SELECT COUNT(*) FROM settlement_outbox WHERE release_state->>'state' = 'in_flight')
                  + (SELECT COUNT(*) FROM settlement_outbox WHERE debit_state->>'state' = 'in_flight')
                  AS in_flight
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RelayStats {
            relayed_transactions: row.get::<i64, _>("relayed") as u64,
            events: row.get::<i64, _>("events") as u64,
            settlements: row.get::<i64, _>("settlements") as u64,
            legs_submitted: row.get::<i64, _>("submitted") as u64,
            legs_failed: row.get::<i64, _>("failed") as u64,
            legs_in_flight: row.get::<i64, _>("in_flight") as u64,
        })
    }
}
