//! Outbound settlement
//!
//! The settlement engine:
//! 1. Releases on the source chain for observed transfers
//! 2. Computes the would-be release hash as cross-chain event metadata
//! 3. Polls the bridge master and settles each pending snapshot once,
//!    releasing on the source chain and debiting on the destination chain

pub mod engine;
pub mod outbox;

pub use engine::SettlementEngine;
pub use outbox::{Leg, LegState, OutboxRecord, PendingSnapshot, SettlementOutbox};
