pub mod clock;
pub mod dukpt;
pub mod hsm;
pub mod in_memory;
pub mod key_store;
pub mod replay_guard;
