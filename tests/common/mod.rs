#![allow(dead_code)]

use authswitch::application::AuthorizationSwitch;
use authswitch::config::SwitchConfig;
use authswitch::domain::key::{Ksn, slots};
use authswitch::domain::message::*;
use authswitch::infrastructure::clock::ManualClock;
use authswitch::infrastructure::dukpt;
use authswitch::infrastructure::hsm::{CryptoService, PinBlockFormat};
use authswitch::infrastructure::in_memory::{
    InMemoryCardStore, InMemoryTerminalStore, InMemoryTransactionStore,
};
use authswitch::infrastructure::key_store::KeyStore;
use authswitch::interfaces::iso8583;
use authswitch::interfaces::provisioning::{ProvisionedKeys, Provisioning};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const ZMK: &str = "FEDCBA98765432100123456789ABCDEF";
pub const BDK: &str = "89ABCDEF01234567FEDCBA9876543210";
pub const TAK: &str = "0123456789ABCDEFFEDCBA9876543210";
pub const RSK: &str = "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F";
pub const PAN: &str = "4111111111111111";
pub const PIN: &str = "1234";
pub const TERMINAL: &str = "T1";

/// Provisioning document with one terminal and one card.
pub fn provisioning_json(terminal_max: &str, card_limit: &str, balance: &str) -> String {
    serde_json::json!({
        "keys": { "zone_master": ZMK, "base_derivation": BDK, "response_signing": RSK },
        "terminals": [{
            "terminal_id": TERMINAL,
            "merchant_id": "MERCHANT_001",
            "mcc": "5411",
            "country": "FR",
            "max_amount": terminal_max,
            "mac_key": TAK
        }],
        "cards": [{
            "pan": PAN,
            "single_txn_limit": card_limit,
            "available_balance": balance,
            "home_country": "FR",
            "pin": PIN
        }]
    })
    .to_string()
}

/// Default provisioning document with extra attributes on the card.
pub fn provisioning_with_card(attributes: serde_json::Value) -> String {
    let mut document: serde_json::Value =
        serde_json::from_str(&provisioning_json("2000.00", "1000.00", "5000.00")).unwrap();
    if let (Some(card), Some(extra)) = (document["cards"][0].as_object_mut(), attributes.as_object()) {
        for (name, value) in extra {
            card.insert(name.clone(), value.clone());
        }
    }
    document.to_string()
}

pub fn write_provisioning(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(provisioning_json("2000.00", "1000.00", "5000.00").as_bytes())
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 12, 14, 0, 0).unwrap()
}

pub struct Harness {
    pub switch: AuthorizationSwitch,
    pub keys: Arc<KeyStore>,
    pub clock: Arc<ManualClock>,
    pub provisioned: ProvisionedKeys,
}

pub async fn harness() -> Harness {
    harness_with(provisioning_json("2000.00", "1000.00", "5000.00")).await
}

pub async fn harness_with(document: String) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let keys = Arc::new(KeyStore::new(clock.clone()));
    let cards = InMemoryCardStore::new();
    let terminals = InMemoryTerminalStore::new();
    let provisioned = Provisioning::from_json(&document)
        .unwrap()
        .apply(&keys, &terminals, &cards, Duration::days(30))
        .await
        .unwrap();

    let switch = AuthorizationSwitch::new(
        SwitchConfig::default(),
        keys.clone(),
        Box::new(cards),
        Box::new(terminals),
        Box::new(InMemoryTransactionStore::new()),
        clock.clone(),
    );
    Harness {
        switch,
        keys,
        clock,
        provisioned,
    }
}

/// Builds terminal requests the way a terminal holding the test keys would.
pub struct RequestBuilder {
    message: Message,
    pin: Option<(String, u32)>,
}

impl RequestBuilder {
    pub fn new(stan: &str, amount_minor: u64, at: DateTime<Utc>) -> Self {
        let message = Message::new(Mti::AuthorizationRequest)
            .with(FIELD_PAN, PAN)
            .unwrap()
            .with(FIELD_PROCESSING_CODE, "000000")
            .unwrap()
            .with(FIELD_AMOUNT, format!("{amount_minor:012}"))
            .unwrap()
            .with(FIELD_TRANSMISSION_TIME, at.format("%m%d%H%M%S").to_string())
            .unwrap()
            .with(FIELD_STAN, stan)
            .unwrap()
            .with(FIELD_TERMINAL_ID, format!("{TERMINAL:<8}"))
            .unwrap()
            .with(FIELD_MERCHANT_ID, format!("{:<15}", "MERCHANT_001"))
            .unwrap()
            .with(FIELD_CURRENCY, "978")
            .unwrap();
        Self { message, pin: None }
    }

    pub fn field(mut self, field: u8, value: &str) -> Self {
        self.message.set(field, value).unwrap();
        self
    }

    pub fn country(self, code: &str) -> Self {
        let location = format!("{:<38}{code}", "SOMEWHERE");
        self.field(FIELD_MERCHANT_LOCATION, &location)
    }

    pub fn mcc(self, mcc: &str) -> Self {
        self.field(FIELD_MCC, mcc)
    }

    pub fn ecommerce(self) -> Self {
        self.field(FIELD_ENTRY_MODE, "812")
    }

    pub fn pin(mut self, pin: &str, counter: u32) -> Self {
        self.pin = Some((pin.to_string(), counter));
        self
    }

    /// Unsealed message, including PIN fields when requested.
    pub fn message(&self, harness: &Harness) -> Message {
        let mut message = self.message.clone();
        if let Some((pin, counter)) = &self.pin {
            let bdk = harness.keys.current(slots::BASE_DERIVATION).unwrap();
            let ksn = Ksn::for_terminal(TERMINAL, *counter).unwrap();
            let key = dukpt::derive(&bdk, &ksn).unwrap();
            let block = CryptoService::new()
                .encrypt_pin_block(PinBlockFormat::Iso0, pin, PAN, &key)
                .unwrap();
            message.set(FIELD_PIN_BLOCK, hex::encode_upper(block)).unwrap();
            message.set(FIELD_KSN, ksn.to_hex()).unwrap();
        }
        message
    }

    /// Sealed and encoded under the terminal MAC key.
    pub fn build(&self, harness: &Harness) -> Vec<u8> {
        let mut message = self.message(harness);
        let tak = harness.keys.current(&slots::terminal_mac(TERMINAL)).unwrap();
        CryptoService::new().seal_message(&mut message, &*tak).unwrap();
        iso8583::encode(&message).unwrap()
    }
}
