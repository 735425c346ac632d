use crate::config::SwitchConfig;
use crate::domain::key::{Key, KeyEnvelope, KeyId, KeyState, RevocationReason};
use crate::domain::ports::{Endpoint, KeyDistributorHandle};
use crate::error::{DistributionError, KeyStateError, Result};
use crate::infrastructure::hsm::{CryptoService, SigningKeyPair};
use crate::infrastructure::key_store::KeyStore;
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What happened to a key change across the endpoint fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationReport {
    pub previous: KeyId,
    pub new_key: KeyId,
    pub version: u32,
    pub kcv: String,
    pub delivered: Vec<String>,
    pub failures: Vec<(String, DistributionError)>,
    /// A strict majority of known endpoints received the key.
    pub quorum_reached: bool,
}

/// Administrative surface for the key lifecycle: planned rotation,
/// compromise recovery and revocation.
pub struct KeyManager {
    keys: Arc<KeyStore>,
    distributor: KeyDistributorHandle,
    crypto: CryptoService,
    signer: Arc<SigningKeyPair>,
    config: SwitchConfig,
}

impl KeyManager {
    pub fn new(
        keys: Arc<KeyStore>,
        distributor: KeyDistributorHandle,
        signer: Arc<SigningKeyPair>,
        config: SwitchConfig,
    ) -> Self {
        Self {
            keys,
            distributor,
            crypto: CryptoService::new(),
            signer,
            config,
        }
    }

    /// Public half of the envelope signing key, for endpoints to pin.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }

    /// Planned rotation: generate, distribute, activate.
    ///
    /// Deliveries run concurrently and a failing endpoint does not hold up
    /// the others. Without a single successful delivery the pending key is
    /// revoked and the current key stays in place. Activation below quorum
    /// goes ahead with a warning.
    pub async fn rotate_key(&self, id: KeyId) -> Result<RotationReport> {
        let pending = self.keys.rotate(id)?;
        let envelope = match self.envelope(&pending, id) {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                self.abandon(&pending, "envelope could not be built");
                return Err(e);
            }
        };

        let endpoints = match self.distributor.endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                self.abandon(&pending, "endpoint listing failed");
                return Err(e);
            }
        };
        let total = endpoints.len();
        let (mut failures, online) = split_offline(endpoints);

        let mut deliveries = JoinSet::new();
        for endpoint in online {
            let distributor = self.distributor.clone();
            let envelope = envelope.clone();
            deliveries.spawn(async move {
                let outcome = distributor.deliver(&endpoint.id, &envelope).await;
                (endpoint.id, outcome)
            });
        }

        let mut delivered = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((endpoint, Ok(()))) => delivered.push(endpoint),
                Ok((endpoint, Err(e))) => {
                    warn!(endpoint = %endpoint, error = %e, key_id = %pending.id, "key delivery failed");
                    failures.push((endpoint, e));
                }
                Err(e) => error!(error = %e, "delivery task aborted"),
            }
        }
        delivered.sort();
        failures.sort_by(|a, b| a.0.cmp(&b.0));

        if delivered.is_empty() {
            self.abandon(&pending, "no endpoint accepted the key");
            return Err(KeyStateError::NotDistributed(pending.id).into());
        }
        let quorum_reached = has_quorum(delivered.len(), total);
        if !quorum_reached {
            warn!(
                key_id = %pending.id,
                delivered = delivered.len(),
                endpoints = total,
                "activating below distribution quorum"
            );
        }

        let activation = self
            .keys
            .activate(pending.id, self.config.rotation_validity())?;
        info!(
            previous = %id,
            key_id = %activation.key.id,
            version = activation.key.version,
            delivered = delivered.len(),
            "key rotated"
        );
        Ok(RotationReport {
            previous: id,
            new_key: activation.key.id,
            version: activation.key.version,
            kcv: activation.key.kcv.clone(),
            delivered,
            failures,
            quorum_reached,
        })
    }

    /// Emergency replacement of a compromised key.
    ///
    /// The successor is activated before distribution with the short
    /// compromise validity, the old key is revoked as compromised, and the
    /// new key is then pushed to every online endpoint one at a time.
    ///
    /// A root key has nothing independent to wrap its replacement under, so
    /// its compromise is refused and the key store is left untouched.
    pub async fn compromise_key(&self, id: KeyId) -> Result<RotationReport> {
        if self.keys.get(id)?.parent.is_none() {
            return Err(KeyStateError::NoWrappingKey(id).into());
        }
        let successor = self
            .keys
            .emergency_successor(id, self.config.compromise_version_jump)?;
        let activation = self.keys.activate_replacing(
            successor.id,
            self.config.compromise_validity(),
            RevocationReason::Compromised,
        )?;
        let key = activation.key;
        warn!(
            target: "audit",
            compromised = %id,
            replacement = %key.id,
            version = key.version,
            "key compromised, replacement active"
        );

        let envelope = self.envelope(&key, id)?;
        let endpoints = self.distributor.endpoints().await?;
        let total = endpoints.len();
        let (mut failures, online) = split_offline(endpoints);

        let mut delivered = Vec::new();
        for endpoint in online {
            match self.distributor.deliver(&endpoint.id, &envelope).await {
                Ok(()) => delivered.push(endpoint.id),
                Err(e) => {
                    warn!(endpoint = %endpoint.id, error = %e, key_id = %key.id, "emergency key delivery failed");
                    failures.push((endpoint.id, e));
                }
            }
        }

        Ok(RotationReport {
            previous: id,
            new_key: key.id,
            version: key.version,
            kcv: key.kcv.clone(),
            quorum_reached: has_quorum(delivered.len(), total),
            delivered,
            failures,
        })
    }

    pub fn revoke_key(&self, id: KeyId, reason: RevocationReason) -> Result<Arc<Key>> {
        let key = self.keys.revoke(id, reason)?;
        warn!(target: "audit", key_id = %id, reason = ?key.revocation_reason, "key revoked");
        Ok(key)
    }

    /// Wraps `key` under its parent, or under the key it replaces when it
    /// sits at the root, and signs the envelope.
    fn envelope(&self, key: &Key, replacing: KeyId) -> Result<KeyEnvelope> {
        let wrapping_key = self.keys.get(key.parent.unwrap_or(replacing))?;
        if wrapping_key.id == key.id {
            return Err(KeyStateError::NoWrappingKey(key.id).into());
        }
        if wrapping_key.state == KeyState::Revoked {
            return Err(KeyStateError::Revoked(wrapping_key.id).into());
        }
        let wrapped = self.crypto.wrap_key(key, &wrapping_key)?;

        let mut envelope = KeyEnvelope {
            slot: key.slot.clone(),
            key_id: key.id,
            version: key.version,
            kcv: key.kcv.clone(),
            wrapped,
            signature: Vec::new(),
        };
        envelope.signature = self.crypto.sign(&envelope.signing_payload(), &self.signer);
        Ok(envelope)
    }

    fn abandon(&self, pending: &Key, why: &str) {
        let reason = RevocationReason::Administrative(why.to_string());
        if let Err(e) = self.keys.revoke(pending.id, reason) {
            error!(key_id = %pending.id, error = %e, "failed to discard pending key");
        }
    }
}

fn split_offline(endpoints: Vec<Endpoint>) -> (Vec<(String, DistributionError)>, Vec<Endpoint>) {
    let (online, offline): (Vec<_>, Vec<_>) = endpoints.into_iter().partition(|e| e.online);
    let failures = offline
        .into_iter()
        .map(|e| {
            let error = DistributionError::Offline(e.id.clone());
            (e.id, error)
        })
        .collect();
    (failures, online)
}

fn has_quorum(delivered: usize, total: usize) -> bool {
    total > 0 && delivered * 2 > total
}
