//! ISO 8583 style ASCII wire format with a primary hex bitmap.

pub mod bitmap;
pub mod codec;
pub mod fields;

pub use codec::{decode, encode, mac_input};
