//! Application layer orchestrating the domain and infrastructure.
//!
//! `AuthorizationSwitch` runs the per-message pipeline from raw request to
//! signed response. `KeyManager` is the administrative surface for key
//! rotation, compromise recovery and revocation.

pub mod key_manager;
pub mod switch;

pub use key_manager::{KeyManager, RotationReport};
pub use switch::{AuthorizationOutcome, AuthorizationSwitch};
