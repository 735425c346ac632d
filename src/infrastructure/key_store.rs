use super::dukpt::{self, KsnLedger};
use super::hsm::kcv::{has_odd_parity, kcv, set_odd_parity};
use crate::domain::key::{
    Key, KeyAlgorithm, KeyId, KeyMaterial, KeyState, KeyUsage, Ksn, RevocationReason,
    TransactionKey,
};
use crate::domain::ports::ClockHandle;
use crate::error::{CryptoError, KeyStateError, Result};
use chrono::Duration;
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for a freshly generated key.
#[derive(Debug, Clone)]
pub struct KeyRequest {
    pub slot: String,
    pub usage: KeyUsage,
    pub algorithm: KeyAlgorithm,
    pub bits: usize,
    pub parent: Option<KeyId>,
}

/// Parameters for key material supplied from outside, e.g. loaded from a
/// key ceremony.
#[derive(Debug, Clone)]
pub struct KeyImport {
    pub slot: String,
    pub usage: KeyUsage,
    pub algorithm: KeyAlgorithm,
    pub material: KeyMaterial,
    pub parent: Option<KeyId>,
}

/// Result of swapping a pending key into its slot.
#[derive(Debug, Clone)]
pub struct Activation {
    pub key: Arc<Key>,
    pub retired: Option<Arc<Key>>,
}

#[derive(Default)]
struct KeyTable {
    // index is id - 1
    keys: Vec<Arc<Key>>,
    current: HashMap<String, KeyId>,
    pending: HashMap<String, KeyId>,
}

impl KeyTable {
    fn get(&self, id: KeyId) -> Option<&Arc<Key>> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.keys.get(index))
    }

    fn replace(&mut self, key: Key) -> Arc<Key> {
        let key = Arc::new(key);
        if let Some(slot) = (key.id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.keys.get_mut(index))
        {
            *slot = key.clone();
        }
        key
    }

    fn next_id(&self) -> KeyId {
        KeyId(self.keys.len() as u32 + 1)
    }

    fn latest_version(&self, slot: &str) -> u32 {
        self.keys
            .iter()
            .filter(|key| key.slot == slot)
            .map(|key| key.version)
            .max()
            .unwrap_or(0)
    }
}

/// Versioned key table.
///
/// Keys are never mutated in place: every state change stores a new
/// `Arc<Key>` in the arena, and each slot keeps a pointer to its current key
/// and at most one pending successor. Readers clone the `Arc` and keep using
/// the version they were handed even if a rotation completes meanwhile.
pub struct KeyStore {
    table: RwLock<KeyTable>,
    ksn_ledger: KsnLedger,
    clock: ClockHandle,
}

impl KeyStore {
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            table: RwLock::new(KeyTable::default()),
            ksn_ledger: KsnLedger::new(),
            clock,
        }
    }

    /// Generates a random key in the `PENDING` state.
    ///
    /// DES family keys are adjusted to odd parity. The new key takes the next
    /// version of its slot.
    pub fn generate_key(&self, request: KeyRequest) -> Result<Arc<Key>> {
        self.generate_versioned(request, 1)
    }

    fn generate_versioned(&self, request: KeyRequest, version_step: u32) -> Result<Arc<Key>> {
        let len = request.algorithm.key_len(request.bits)?;
        let mut material = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut material);
        if request.algorithm.requires_parity() {
            set_odd_parity(&mut material);
        }
        self.insert_pending(
            KeyImport {
                slot: request.slot,
                usage: request.usage,
                algorithm: request.algorithm,
                material: KeyMaterial::new(material),
                parent: request.parent,
            },
            version_step,
        )
    }

    /// Stores externally supplied key material in the `PENDING` state after
    /// checking its length and, for DES family keys, its parity.
    pub fn import_key(&self, import: KeyImport) -> Result<Arc<Key>> {
        import.algorithm.key_len(import.material.len() * 8)?;
        if import.algorithm.requires_parity() && !has_odd_parity(import.material.as_bytes()) {
            return Err(CryptoError::Parity.into());
        }
        self.insert_pending(import, 1)
    }

    fn insert_pending(&self, import: KeyImport, version_step: u32) -> Result<Arc<Key>> {
        // crypto stays outside the lock
        let check_value = kcv(import.algorithm, import.material.as_bytes())?;
        let now = self.clock.now();

        let mut table = self.table.write();
        if let Some(parent_id) = import.parent {
            let parent = table.get(parent_id).ok_or(KeyStateError::Missing(parent_id))?;
            if parent.state == KeyState::Revoked {
                return Err(KeyStateError::Revoked(parent_id).into());
            }
            if !parent.usage.can_own(import.usage) {
                return Err(KeyStateError::InvalidParent(parent_id).into());
            }
        }
        if table.pending.contains_key(&import.slot) {
            return Err(KeyStateError::RotationInProgress(import.slot).into());
        }

        let key = Key {
            id: table.next_id(),
            version: table.latest_version(&import.slot) + version_step,
            slot: import.slot,
            usage: import.usage,
            algorithm: import.algorithm,
            material: import.material,
            kcv: check_value,
            parent: import.parent,
            state: KeyState::Pending,
            created_at: now,
            activated_at: None,
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
        };
        let key = Arc::new(key);
        table.pending.insert(key.slot.clone(), key.id);
        table.keys.push(key.clone());

        info!(key_id = %key.id, slot = %key.slot, version = key.version, kcv = %key.kcv, "key generated");
        Ok(key)
    }

    /// Starts a planned rotation of an active key: generates its pending
    /// successor with the same slot, usage, algorithm, size and parent.
    pub fn rotate(&self, id: KeyId) -> Result<Arc<Key>> {
        self.successor(id, 1)
    }

    /// Like [`KeyStore::rotate`], but the successor's version jumps ahead
    /// so emergency keys stand out in audit trails.
    ///
    /// A planned successor already pending in the slot is revoked as
    /// compromised first and never becomes active.
    pub fn emergency_successor(&self, id: KeyId, version_jump: u32) -> Result<Arc<Key>> {
        let key = self.get(id)?;
        if key.state == KeyState::Active
            && let Some(pending) = self.pending(&key.slot)
        {
            self.revoke(pending.id, RevocationReason::Compromised)?;
            warn!(key_id = %pending.id, slot = %key.slot, "pending rotation abandoned for compromise");
        }
        self.successor(id, version_jump)
    }

    fn successor(&self, id: KeyId, version_step: u32) -> Result<Arc<Key>> {
        let key = self.get(id)?;
        match key.state {
            KeyState::Active => {}
            KeyState::Revoked => return Err(KeyStateError::Revoked(id).into()),
            KeyState::Pending => {
                return Err(KeyStateError::WrongState {
                    id,
                    state: key.state,
                    expected: KeyState::Active,
                }
                .into());
            }
        }
        let parent = match key.parent {
            Some(parent) => Some(self.live_parent(parent)?),
            None => None,
        };
        self.generate_versioned(
            KeyRequest {
                slot: key.slot.clone(),
                usage: key.usage,
                algorithm: key.algorithm,
                bits: key.material.len() * 8,
                parent,
            },
            version_step,
        )
    }

    /// A parent that has been replaced hands its children over to the
    /// current key of its slot.
    fn live_parent(&self, id: KeyId) -> Result<KeyId> {
        let parent = self.get(id)?;
        if parent.state == KeyState::Revoked {
            return Ok(self.current(&parent.slot)?.id);
        }
        Ok(id)
    }

    /// Activates a pending key, retiring the slot's previous key as rotated.
    pub fn activate(&self, id: KeyId, validity: Duration) -> Result<Activation> {
        self.activate_replacing(id, validity, RevocationReason::Rotated)
    }

    /// Activates a pending key and revokes the slot's previous key with the
    /// given reason. The current-key pointer and both state changes move in
    /// one critical section.
    pub fn activate_replacing(
        &self,
        id: KeyId,
        validity: Duration,
        reason: RevocationReason,
    ) -> Result<Activation> {
        let now = self.clock.now();
        let mut table = self.table.write();

        let pending = table.get(id).ok_or(KeyStateError::Missing(id))?.clone();
        if pending.state != KeyState::Pending {
            return Err(KeyStateError::WrongState {
                id,
                state: pending.state,
                expected: KeyState::Pending,
            }
            .into());
        }

        let mut activated = (*pending).clone();
        activated.state = KeyState::Active;
        activated.activated_at = Some(now);
        activated.expires_at = Some(now + validity);
        let activated = table.replace(activated);

        table.pending.remove(&activated.slot);
        let previous = table.current.insert(activated.slot.clone(), id);

        let retired = match previous.and_then(|prev| table.get(prev).cloned()) {
            Some(old) if old.state != KeyState::Revoked => {
                let mut revoked = (*old).clone();
                revoked.state = KeyState::Revoked;
                revoked.revoked_at = Some(now);
                revoked.revocation_reason = Some(reason);
                Some(table.replace(revoked))
            }
            _ => None,
        };

        info!(
            key_id = %activated.id,
            slot = %activated.slot,
            version = activated.version,
            retired = ?retired.as_ref().map(|key| key.id),
            "key activated"
        );
        Ok(Activation {
            key: activated,
            retired,
        })
    }

    /// Revokes a key. Revocation is terminal; the key stays in the table for
    /// audit but is never handed out again.
    pub fn revoke(&self, id: KeyId, reason: RevocationReason) -> Result<Arc<Key>> {
        let now = self.clock.now();
        let mut table = self.table.write();

        let key = table.get(id).ok_or(KeyStateError::Missing(id))?.clone();
        if key.state == KeyState::Revoked {
            return Err(KeyStateError::Revoked(id).into());
        }

        let mut revoked = (*key).clone();
        revoked.state = KeyState::Revoked;
        revoked.revoked_at = Some(now);
        revoked.revocation_reason = Some(reason);
        let revoked = table.replace(revoked);

        if table.current.get(&revoked.slot) == Some(&id) {
            table.current.remove(&revoked.slot);
        }
        if table.pending.get(&revoked.slot) == Some(&id) {
            table.pending.remove(&revoked.slot);
        }

        info!(key_id = %id, slot = %revoked.slot, reason = ?revoked.revocation_reason, "key revoked");
        Ok(revoked)
    }

    pub fn get(&self, id: KeyId) -> Result<Arc<Key>> {
        self.table
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| KeyStateError::Missing(id).into())
    }

    /// The active key of a slot, checked against its validity window.
    pub fn current(&self, slot: &str) -> Result<Arc<Key>> {
        let key = {
            let table = self.table.read();
            let id = table
                .current
                .get(slot)
                .ok_or_else(|| KeyStateError::NoActiveKey(slot.to_string()))?;
            table.get(*id).cloned().ok_or(KeyStateError::Missing(*id))?
        };
        key.ensure_usable(self.clock.now())?;
        Ok(key)
    }

    pub fn pending(&self, slot: &str) -> Option<Arc<Key>> {
        let table = self.table.read();
        table.pending.get(slot).and_then(|id| table.get(*id).cloned())
    }

    /// Every version ever stored in a slot, oldest first.
    pub fn history(&self, slot: &str) -> Vec<Arc<Key>> {
        let table = self.table.read();
        let mut keys: Vec<Arc<Key>> = table
            .keys
            .iter()
            .filter(|key| key.slot == slot)
            .cloned()
            .collect();
        keys.sort_by_key(|key| (key.version, key.id));
        keys
    }

    /// Derives the single-use key for `ksn`, consuming the KSN.
    ///
    /// The base key must be an active base derivation key. A KSN whose
    /// counter was already consumed for its terminal is refused as a replay.
    pub fn derive_session_key(&self, base_id: KeyId, ksn: &Ksn) -> Result<TransactionKey> {
        let bdk = self.get(base_id)?;
        bdk.ensure_usable(self.clock.now())?;
        if bdk.usage != KeyUsage::BaseDerivation {
            return Err(KeyStateError::WrongUsage {
                id: base_id,
                expected: "transaction key derivation",
            }
            .into());
        }
        self.ksn_ledger.consume(base_id, ksn)?;
        let key = dukpt::derive(&bdk, ksn)?;
        debug!(bdk = %base_id, counter = ksn.counter(), "transaction key derived");
        Ok(key)
    }
}
