// authward-firewall: the narrow contract between the offender engine and
// whatever actually drops packets. Back-ends are deliberately thin; the
// interesting part is the protocol, not the plumbing.

pub mod command;
pub mod hosts;
pub mod null;

use thiserror::Error;

use authward_core::{Addr, Service};

pub use command::{CommandFirewall, CommandSpec};
pub use hosts::HostsFirewall;
pub use null::NullFirewall;

#[derive(Debug, Error)]
pub enum FwError {
    #[error("firewall operation failed: {0}")]
    Failed(String),
    #[error("operation not supported by this back-end")]
    Unsupported,
}

pub type FwResult = Result<(), FwError>;

/// The contract every back-end exposes.
///
/// `Unsupported` is a soft outcome: the engine logs it and carries on, so a
/// back-end may implement only the operations its filter can express.
/// Batch calls receive addresses of a single family; the caller splits
/// mixed batches beforehand.
pub trait Firewall: Send + Sync {
    fn init(&self) -> FwResult {
        Ok(())
    }

    fn finalize(&self) -> FwResult {
        Ok(())
    }

    fn block(&self, addr: &Addr, service: Service) -> FwResult;

    /// Block several addresses at once. The default lowers the batch onto
    /// repeated single blocks and reports an error if any of them failed.
    fn block_batch(&self, batch: &[(Addr, Service)]) -> FwResult {
        let mut failures = 0;
        for (addr, service) in batch {
            if self.block(addr, *service).is_err() {
                failures += 1;
            }
        }
        if failures == 0 {
            Ok(())
        } else {
            Err(FwError::Failed(format!(
                "{failures} of {} block commands failed",
                batch.len()
            )))
        }
    }

    fn release(&self, addr: &Addr, service: Service) -> FwResult;

    /// Drop every rule this daemon installed; called on graceful shutdown.
    fn flush_all(&self) -> FwResult;
}
