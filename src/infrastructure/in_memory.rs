use crate::domain::key::KeyEnvelope;
use crate::domain::ports::{
    CardStore, Endpoint, KeyDistributor, TerminalStore, TransactionStore,
};
use crate::domain::transaction::{CardProfile, HistoricalTransaction, TerminalProfile};
use crate::error::{DistributionError, Result};
use crate::infrastructure::hsm::CryptoService;
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A thread-safe in-memory store for card profiles, keyed by PAN.
#[derive(Default, Clone)]
pub struct InMemoryCardStore {
    cards: Arc<RwLock<HashMap<String, CardProfile>>>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn store(&self, card: CardProfile) -> Result<()> {
        let mut cards = self.cards.write().await;
        cards.insert(card.pan.clone(), card);
        Ok(())
    }

    async fn get(&self, pan: &str) -> Result<Option<CardProfile>> {
        let cards = self.cards.read().await;
        Ok(cards.get(pan).cloned())
    }
}

/// Terminal registry. Ordered by terminal id so listings are stable.
#[derive(Default, Clone)]
pub struct InMemoryTerminalStore {
    terminals: Arc<RwLock<BTreeMap<String, TerminalProfile>>>,
}

impl InMemoryTerminalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TerminalStore for InMemoryTerminalStore {
    async fn store(&self, terminal: TerminalProfile) -> Result<()> {
        let mut terminals = self.terminals.write().await;
        terminals.insert(terminal.terminal_id.trim().to_string(), terminal);
        Ok(())
    }

    async fn get(&self, terminal_id: &str) -> Result<Option<TerminalProfile>> {
        let terminals = self.terminals.read().await;
        Ok(terminals.get(terminal_id.trim()).cloned())
    }

    async fn all_terminals(&self) -> Result<Vec<TerminalProfile>> {
        let terminals = self.terminals.read().await;
        Ok(terminals.values().cloned().collect())
    }
}

/// Keeps the most recent transactions of each card, newest at the front.
///
/// Older entries fall off once a card holds `depth` transactions, which
/// bounds memory no matter how long the switch runs.
#[derive(Clone)]
pub struct InMemoryTransactionStore {
    history: Arc<RwLock<HashMap<String, VecDeque<HistoricalTransaction>>>>,
    depth: usize,
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self::with_depth(20)
    }
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            depth: depth.max(1),
        }
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn record(&self, tx: HistoricalTransaction) -> Result<()> {
        let mut history = self.history.write().await;
        let entries = history.entry(tx.pan.clone()).or_default();
        entries.push_front(tx);
        entries.truncate(self.depth);
        Ok(())
    }

    async fn recent(&self, pan: &str, limit: usize) -> Result<Vec<HistoricalTransaction>> {
        let history = self.history.read().await;
        Ok(history
            .get(pan)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    online: bool,
    inbox: Vec<KeyEnvelope>,
}

/// Key distribution over an in-process registry of endpoints.
///
/// Offline endpoints refuse delivery. When a verifying key is configured,
/// envelopes whose signature does not check out are rejected the way a real
/// terminal would reject them.
#[derive(Default, Clone)]
pub struct InMemoryKeyDistributor {
    endpoints: Arc<RwLock<BTreeMap<String, EndpointState>>>,
    verifying_key: Option<VerifyingKey>,
}

impl InMemoryKeyDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifying_key(verifying_key: VerifyingKey) -> Self {
        Self {
            endpoints: Arc::default(),
            verifying_key: Some(verifying_key),
        }
    }

    pub async fn register(&self, id: &str, online: bool) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.entry(id.trim().to_string()).or_default().online = online;
    }

    pub async fn set_online(&self, id: &str, online: bool) -> Result<(), DistributionError> {
        let mut endpoints = self.endpoints.write().await;
        let state = endpoints
            .get_mut(id.trim())
            .ok_or_else(|| DistributionError::UnknownEndpoint(id.to_string()))?;
        state.online = online;
        Ok(())
    }

    /// Envelopes received by an endpoint, oldest first.
    pub async fn received(&self, id: &str) -> Vec<KeyEnvelope> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .get(id.trim())
            .map(|state| state.inbox.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyDistributor for InMemoryKeyDistributor {
    async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints
            .iter()
            .map(|(id, state)| Endpoint {
                id: id.clone(),
                online: state.online,
            })
            .collect())
    }

    async fn deliver(&self, endpoint: &str, envelope: &KeyEnvelope) -> Result<(), DistributionError> {
        if let Some(verifying_key) = &self.verifying_key {
            CryptoService::new()
                .verify_signature(&envelope.signing_payload(), &envelope.signature, verifying_key)
                .map_err(|e| DistributionError::Rejected {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let mut endpoints = self.endpoints.write().await;
        let state = endpoints
            .get_mut(endpoint)
            .ok_or_else(|| DistributionError::UnknownEndpoint(endpoint.to_string()))?;
        if !state.online {
            return Err(DistributionError::Offline(endpoint.to_string()));
        }
        state.inbox.push(envelope.clone());
        debug!(endpoint, key_id = %envelope.key_id, version = envelope.version, "envelope delivered");
        Ok(())
    }
}
