// authward-core: addresses, services, attack records, whitelist, blacklist store.
// No internal authward dependencies; this is the foundation crate.

pub mod address;
pub mod attack;
pub mod blacklist;
pub mod config;
pub mod service;
pub mod time;
pub mod whitelist;

pub use address::{Addr, AddrError};
pub use attack::{Attack, AttackerRecord, DEFAULT_DANGER};
pub use service::Service;
pub use whitelist::Whitelist;
