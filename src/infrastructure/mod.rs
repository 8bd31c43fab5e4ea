pub mod encryption;
pub mod explorer_client;
pub mod log_redact;
pub mod logging;
pub mod pbkdf2;
pub mod rpc_client;
pub mod secure_store;
