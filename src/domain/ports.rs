use super::key::KeyEnvelope;
use super::transaction::{CardProfile, HistoricalTransaction, TerminalProfile};
use crate::error::{DistributionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn store(&self, card: CardProfile) -> Result<()>;
    async fn get(&self, pan: &str) -> Result<Option<CardProfile>>;
}

#[async_trait]
pub trait TerminalStore: Send + Sync {
    async fn store(&self, terminal: TerminalProfile) -> Result<()>;
    async fn get(&self, terminal_id: &str) -> Result<Option<TerminalProfile>>;
    async fn all_terminals(&self) -> Result<Vec<TerminalProfile>>;
}

/// Bounded per-card history feeding the risk and fraud engines.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn record(&self, tx: HistoricalTransaction) -> Result<()>;
    /// Most recent first, at most `limit` entries.
    async fn recent(&self, pan: &str, limit: usize) -> Result<Vec<HistoricalTransaction>>;
}

/// A terminal or host that receives key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub online: bool,
}

/// Transport for key envelopes during rotation and compromise recovery.
#[async_trait]
pub trait KeyDistributor: Send + Sync {
    async fn endpoints(&self) -> Result<Vec<Endpoint>>;
    async fn deliver(&self, endpoint: &str, envelope: &KeyEnvelope) -> Result<(), DistributionError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type CardStoreBox = Box<dyn CardStore>;
pub type TerminalStoreBox = Box<dyn TerminalStore>;
pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type KeyDistributorHandle = Arc<dyn KeyDistributor>;
pub type ClockHandle = Arc<dyn Clock>;
