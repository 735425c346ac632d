pub mod authorization;
pub mod fraud;
pub mod key;
pub mod message;
pub mod ports;
pub mod risk;
pub mod transaction;
