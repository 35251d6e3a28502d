//! Back-end that accepts everything and touches nothing. Useful for dry
//! runs and for watching what the daemon would do before arming it.

use tracing::info;

use authward_core::{Addr, Service};

use crate::{Firewall, FwResult};

pub struct NullFirewall;

impl Firewall for NullFirewall {
    fn block(&self, addr: &Addr, service: Service) -> FwResult {
        info!(%addr, %service, "null firewall: would block");
        Ok(())
    }

    fn release(&self, addr: &Addr, service: Service) -> FwResult {
        info!(%addr, %service, "null firewall: would release");
        Ok(())
    }

    fn flush_all(&self) -> FwResult {
        info!("null firewall: would flush all blocks");
        Ok(())
    }
}
