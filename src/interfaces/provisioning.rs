//! JSON bootstrap of keys, terminals and cards.
//!
//! ```json
//! {
//!   "keys": { "zone_master": "<hex>", "base_derivation": "<hex>", "response_signing": "<hex>" },
//!   "terminals": [{ "terminal_id": "T1", "merchant_id": "M1", "mcc": "5411",
//!                   "country": "FR", "max_amount": "2000", "mac_key": "<hex>" }],
//!   "cards": [{ "pan": "4111111111111111", "single_txn_limit": "1000",
//!               "available_balance": "5000", "home_country": "FR", "pin": "1234",
//!               "status": "ACTIVE", "expiry": "1228" }]
//! }
//! ```
//!
//! The zone master key is mandatory. Missing zone MAC, base derivation or
//! response signing keys are generated. Terminal MAC keys are owned by the
//! zone MAC key.

use crate::domain::key::{KeyAlgorithm, KeyId, KeyMaterial, KeyUsage, slots};
use crate::domain::ports::{CardStore, TerminalStore};
use crate::domain::transaction::{CardExpiry, CardProfile, CardStatus, TerminalProfile};
use crate::error::{Result, SwitchError};
use crate::infrastructure::key_store::{KeyImport, KeyRequest, KeyStore};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct KeyMaterials {
    pub zone_master: String,
    #[serde(default)]
    pub base_derivation: Option<String>,
    #[serde(default)]
    pub response_signing: Option<String>,
    #[serde(default)]
    pub zone_mac: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalEntry {
    #[serde(flatten)]
    pub profile: TerminalProfile,
    pub mac_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardEntry {
    pub pan: String,
    pub single_txn_limit: Decimal,
    pub available_balance: Decimal,
    pub home_country: String,
    #[serde(default)]
    pub three_ds_enrolled: bool,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub status: CardStatus,
    #[serde(default)]
    pub expiry: Option<CardExpiry>,
}

impl From<CardEntry> for CardProfile {
    fn from(entry: CardEntry) -> Self {
        let pin_hash = entry
            .pin
            .as_deref()
            .map(|pin| CardProfile::pin_hash_for(&entry.pan, pin));
        CardProfile {
            pan: entry.pan,
            single_txn_limit: entry.single_txn_limit,
            available_balance: entry.available_balance,
            home_country: entry.home_country,
            three_ds_enrolled: entry.three_ds_enrolled,
            pin_hash,
            status: entry.status,
            expiry: entry.expiry,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Provisioning {
    pub keys: KeyMaterials,
    #[serde(default)]
    pub terminals: Vec<TerminalEntry>,
    #[serde(default)]
    pub cards: Vec<CardEntry>,
}

/// Ids of the keys that are current once provisioning has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedKeys {
    pub zone_master: KeyId,
    pub zone_mac: KeyId,
    pub base_derivation: KeyId,
    pub response_signing: KeyId,
    pub terminal_mac: Vec<(String, KeyId)>,
}

impl Provisioning {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Imports and activates every key and stores terminals and cards.
    pub async fn apply(
        self,
        keys: &KeyStore,
        terminals: &dyn TerminalStore,
        cards: &dyn CardStore,
        validity: Duration,
    ) -> Result<ProvisionedKeys> {
        let zone_master = import(
            keys,
            slots::ZONE_MASTER,
            KeyUsage::ZoneMaster,
            KeyAlgorithm::TripleDes,
            &self.keys.zone_master,
            None,
            validity,
        )?;

        let zone_mac = match &self.keys.zone_mac {
            Some(hex) => import(
                keys,
                slots::ZONE_MAC,
                KeyUsage::ZoneMac,
                KeyAlgorithm::TripleDes,
                hex,
                Some(zone_master),
                validity,
            )?,
            None => generate(
                keys,
                slots::ZONE_MAC,
                KeyUsage::ZoneMac,
                KeyAlgorithm::TripleDes,
                128,
                zone_master,
                validity,
            )?,
        };

        let base_derivation = match &self.keys.base_derivation {
            Some(hex) => import(
                keys,
                slots::BASE_DERIVATION,
                KeyUsage::BaseDerivation,
                KeyAlgorithm::TripleDes,
                hex,
                Some(zone_master),
                validity,
            )?,
            None => generate(
                keys,
                slots::BASE_DERIVATION,
                KeyUsage::BaseDerivation,
                KeyAlgorithm::TripleDes,
                128,
                zone_master,
                validity,
            )?,
        };

        let response_signing = match &self.keys.response_signing {
            Some(hex) => import(
                keys,
                slots::RESPONSE_SIGNING,
                KeyUsage::ResponseSigning,
                KeyAlgorithm::HmacSha256,
                hex,
                Some(zone_master),
                validity,
            )?,
            None => generate(
                keys,
                slots::RESPONSE_SIGNING,
                KeyUsage::ResponseSigning,
                KeyAlgorithm::HmacSha256,
                256,
                zone_master,
                validity,
            )?,
        };

        let mut terminal_mac = Vec::with_capacity(self.terminals.len());
        for entry in self.terminals {
            let id = entry.profile.terminal_id.trim().to_string();
            if id.is_empty() {
                return Err(SwitchError::ValidationError(
                    "terminal_id must not be empty".into(),
                ));
            }
            let key_id = import(
                keys,
                &slots::terminal_mac(&id),
                KeyUsage::TerminalMac,
                KeyAlgorithm::TripleDes,
                &entry.mac_key,
                Some(zone_mac),
                validity,
            )?;
            terminals.store(entry.profile).await?;
            terminal_mac.push((id, key_id));
        }

        let card_count = self.cards.len();
        for entry in self.cards {
            cards.store(entry.into()).await?;
        }

        info!(
            terminals = terminal_mac.len(),
            cards = card_count,
            "provisioning applied"
        );
        Ok(ProvisionedKeys {
            zone_master,
            zone_mac,
            base_derivation,
            response_signing,
            terminal_mac,
        })
    }
}

fn import(
    keys: &KeyStore,
    slot: &str,
    usage: KeyUsage,
    algorithm: KeyAlgorithm,
    hex: &str,
    parent: Option<KeyId>,
    validity: Duration,
) -> Result<KeyId> {
    let key = keys.import_key(KeyImport {
        slot: slot.to_string(),
        usage,
        algorithm,
        material: KeyMaterial::from_hex(hex)?,
        parent,
    })?;
    Ok(keys.activate(key.id, validity)?.key.id)
}

fn generate(
    keys: &KeyStore,
    slot: &str,
    usage: KeyUsage,
    algorithm: KeyAlgorithm,
    bits: usize,
    parent: KeyId,
    validity: Duration,
) -> Result<KeyId> {
    let key = keys.generate_key(KeyRequest {
        slot: slot.to_string(),
        usage,
        algorithm,
        bits,
        parent: Some(parent),
    })?;
    Ok(keys.activate(key.id, validity)?.key.id)
}
