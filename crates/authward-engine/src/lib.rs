// authward-engine: the offender state machine. Attacks come in from the
// parser; block and release commands go out through the firewall adapter.

mod engine;
mod roster;
mod scheduler;

pub use engine::{EngineParams, OffenderEngine};
pub use roster::BlockRoster;
pub use scheduler::{pardon_loop, release_expired};
