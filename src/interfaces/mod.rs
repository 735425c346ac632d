pub mod csv;
pub mod iso8583;
pub mod provisioning;
