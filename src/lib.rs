// authward: root facade. Option handling, process plumbing, and the
// supervisor that wires sources → parser → engine → firewall together.

pub mod logging;
pub mod options;
pub mod pidfile;
pub mod supervisor;

pub use options::{Cli, Settings};
